//! Instrumentation events for every request.

use std::fmt;

use super::{ErrorAction, Middleware};
use crate::connection::RequestDatum;
use crate::Error;

/// Receiver of instrumentation events.
///
/// Events are named `<instrumentor_name>.request`, `.response`, `.error` and
/// `.retry`.
pub trait Instrumentor: fmt::Debug + Send + Sync {
    /// Handle one event.
    fn instrument(&self, event: &str, datum: &RequestDatum);
}

/// Instrumentor which emits events through [`tracing`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingInstrumentor;

impl Instrumentor for TracingInstrumentor {
    fn instrument(&self, event: &str, datum: &RequestDatum) {
        let host = datum.host.as_deref().unwrap_or_default();
        if let Some(error) = &datum.error {
            tracing::warn!(
                event,
                method = %datum.method,
                host,
                path = %datum.path,
                %error,
                retries_remaining = datum.retries_remaining,
            );
        } else if let Some(response) = &datum.response {
            tracing::debug!(
                event,
                method = %datum.method,
                host,
                path = %datum.path,
                status = response.status().as_u16(),
            );
        } else {
            tracing::debug!(event, method = %datum.method, host, path = %datum.path);
        }
    }
}

/// Middleware which reports each request to the datum's [`Instrumentor`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Instrument;

impl Middleware for Instrument {
    fn request_call(&self, datum: &mut RequestDatum) -> Result<(), Error> {
        datum.instrument("request");
        Ok(())
    }

    fn response_call(&self, datum: &mut RequestDatum) -> Result<(), Error> {
        datum.instrument("response");
        Ok(())
    }

    fn error_call(&self, datum: &mut RequestDatum) -> ErrorAction {
        datum.instrument("error");
        ErrorAction::Propagate
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::middleware::tests::datum;
    use crate::RequestParams;

    /// Collects event names.
    #[derive(Debug, Default)]
    pub(crate) struct Collect(pub(crate) Mutex<Vec<String>>);

    impl Instrumentor for Collect {
        fn instrument(&self, event: &str, _datum: &RequestDatum) {
            self.0.lock().unwrap().push(event.to_owned());
        }
    }

    #[test]
    fn events_use_the_instrumentor_name() {
        let collect = Arc::new(Collect::default());
        let mut datum = datum(RequestParams::get("/"));
        datum.instrumentor = collect.clone();
        datum.instrumentor_name = "api".into();

        Instrument.request_call(&mut datum).unwrap();
        Instrument.response_call(&mut datum).unwrap();
        datum.error = Some(Error::Timeout(crate::error::TimeoutKind::Read));
        assert_eq!(Instrument.error_call(&mut datum), ErrorAction::Propagate);

        assert_eq!(
            *collect.0.lock().unwrap(),
            vec!["api.request", "api.response", "api.error"]
        );
    }

    #[test]
    fn tracing_instrumentor_handles_every_state() {
        let mut datum = datum(RequestParams::get("/"));
        TracingInstrumentor.instrument("tether.request", &datum);
        datum.response = Some(crate::Response::new(http::StatusCode::OK));
        TracingInstrumentor.instrument("tether.response", &datum);
        datum.error = Some(Error::Pipeline("test"));
        TracingInstrumentor.instrument("tether.error", &datum);
    }
}
