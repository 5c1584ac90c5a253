mod codec;
mod respond;
mod server;

pub use server::handle_http;
