//! gRPC implementation of the change relay: the transmitter used by the
//! repository and the service run by each client site.
mod grpc_transmitter;
mod relay_service;


pub use grpc_transmitter::*;
pub use relay_service::*;
