use embedded_hal::delay::DelayNs;

use crate::context::{Config, Context};
use crate::transport::MockTransport;

pub struct StdDelayUs {}

impl DelayNs for StdDelayUs {
    fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(std::time::Duration::from_nanos(ns as u64));
    }
}

pub type MockContext = Context<MockTransport, StdDelayUs>;

/// A context around a [`MockTransport`] whose turnarounds always succeed.
pub fn mock_context(config: Config) -> MockContext {
    let mut transport = MockTransport::new();
    transport.expect_mosi_turnaround().returning(Ok);
    transport.expect_miso_turnaround().returning(Ok);
    Context::new(transport, StdDelayUs {}, config).unwrap()
}
