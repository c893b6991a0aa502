//! Delivery of a buffered response body to a response block.

use super::Response;
use crate::body::ResponseBlock;

/// Hand a buffered body to `sink` in `chunk_size` pieces.
///
/// The sink sees each chunk with the number of bytes still to come and the total
/// length. Afterwards the response body is empty. Without a sink, or with an empty
/// body, nothing happens.
pub(crate) fn stream(response: &mut Response, sink: Option<&mut ResponseBlock>, chunk_size: usize) {
    let Some(sink) = sink else {
        return;
    };
    if response.body().is_empty() {
        return;
    }

    let mut body = response.take_body();
    let total = body.len() as u64;
    let chunk_size = chunk_size.max(1);
    while !body.is_empty() {
        let chunk = body.split_to(chunk_size.min(body.len()));
        sink.call(&chunk, Some(body.len() as u64), Some(total));
    }
}
