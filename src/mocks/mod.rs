//! Mocked entities, useful for tests mostly.

pub mod transport_layer;

pub use transport_layer::MockTransport;
