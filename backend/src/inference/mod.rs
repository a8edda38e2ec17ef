pub mod dispatcher;
pub mod ensemble;
pub mod normalizer;
