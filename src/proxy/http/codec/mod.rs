mod headers;
mod line;
mod request;

pub(crate) use request::{Http1RequestHead, read_http1_request_head};
