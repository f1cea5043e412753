pub mod mock;
pub mod reliable;

pub use mock::{MockProvider, MockResponse};
pub use reliable::{ReliableConfig, ReliableProvider};
