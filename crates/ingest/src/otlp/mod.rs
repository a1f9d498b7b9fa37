pub mod decode;
pub mod grpc;
pub mod http;
pub mod raw;
