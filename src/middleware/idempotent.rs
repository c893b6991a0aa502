use super::{ErrorAction, Middleware};
use crate::connection::RequestDatum;

/// Retries idempotent requests which failed with a socket, timeout or status error.
///
/// A request is retried while `retries_remaining` is greater than one. Requests with
/// a chunked body producer or a body which cannot be rewound are never retried,
/// since their body cannot be sent a second time.
#[derive(Debug, Clone, Copy, Default)]
pub struct Idempotent;

impl Middleware for Idempotent {
    fn error_call(&self, datum: &mut RequestDatum) -> ErrorAction {
        let retryable = datum.error.as_ref().is_some_and(|e| e.is_retryable());
        let rewindable = datum.body.as_ref().map_or(true, |body| body.is_rewindable());

        if datum.idempotent
            && retryable
            && datum.retries_remaining > 1
            && rewindable
            && datum.request_block.is_none()
        {
            datum.retries_remaining -= 1;
            datum.instrument("retry");
            ErrorAction::Retry
        } else {
            ErrorAction::Propagate
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::body::Body;
    use crate::error::TimeoutKind;
    use crate::middleware::tests::datum;
    use crate::{Error, RequestParams};

    fn failed(params: RequestParams, error: Error) -> RequestDatum {
        let mut datum = datum(params);
        datum.error = Some(error);
        datum
    }

    #[test]
    fn retries_until_exhausted() {
        let mut datum = failed(
            RequestParams::get("/").idempotent(true).retry_limit(3),
            Error::Timeout(TimeoutKind::Read),
        );
        assert_eq!(Idempotent.error_call(&mut datum), ErrorAction::Retry);
        assert_eq!(datum.retries_remaining, 2);
        assert_eq!(Idempotent.error_call(&mut datum), ErrorAction::Retry);
        assert_eq!(datum.retries_remaining, 1);
        assert_eq!(Idempotent.error_call(&mut datum), ErrorAction::Propagate);
    }

    #[test]
    fn non_idempotent_requests_propagate() {
        let mut datum = failed(RequestParams::get("/"), Error::socket("broken"));
        assert_eq!(Idempotent.error_call(&mut datum), ErrorAction::Propagate);
    }

    #[test]
    fn other_errors_propagate() {
        let mut datum = failed(
            RequestParams::get("/").idempotent(true),
            Error::Pipeline("misuse"),
        );
        assert_eq!(Idempotent.error_call(&mut datum), ErrorAction::Propagate);
    }

    #[test]
    fn one_shot_bodies_are_not_retried() {
        let mut datum = failed(
            RequestParams::post("/")
                .idempotent(true)
                .body(Body::sized(Cursor::new(b"abc".to_vec()), 3)),
            Error::socket("broken"),
        );
        assert_eq!(Idempotent.error_call(&mut datum), ErrorAction::Propagate);
    }
}
