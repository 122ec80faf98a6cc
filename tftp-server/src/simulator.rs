//! Fault-injecting transport for exercising retransmission.
//!
//! Real networks drop and duplicate datagrams.  [`LossyTransport`] wraps any
//! [`Transport`] and applies a configurable fault model to outbound traffic:
//!
//! | Fault       | Description                                            |
//! |-------------|--------------------------------------------------------|
//! | Loss        | Drop a datagram with probability `loss_rate`.          |
//! | Duplication | Deliver a datagram twice with probability `duplicate_rate`. |
//!
//! Faults are drawn from a seeded RNG so a failing run can be replayed.

use std::io;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::socket::Transport;

/// Configuration for the fault-injection model.
///
/// Probabilities are clamped to `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probability that an outbound datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability that a delivered datagram is sent a second time.
    pub duplicate_rate: f64,
    /// RNG seed.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults by default: a transparent pass-through.
        Self {
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            seed: 0,
        }
    }
}

/// A [`Transport`] that loses and duplicates outbound datagrams.
pub struct LossyTransport<T> {
    inner: T,
    loss_rate: f64,
    duplicate_rate: f64,
    rng: StdRng,
    /// Datagrams dropped so far.
    pub dropped: u64,
    /// Extra copies delivered so far.
    pub duplicated: u64,
}

impl<T> LossyTransport<T> {
    pub fn new(inner: T, config: SimulatorConfig) -> Self {
        Self {
            inner,
            loss_rate: probability(config.loss_rate),
            duplicate_rate: probability(config.duplicate_rate),
            rng: StdRng::seed_from_u64(config.seed),
            dropped: 0,
            duplicated: 0,
        }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

/// Clamp `rate` into `[0.0, 1.0]`; NaN and infinities mean "never".
fn probability(rate: f64) -> f64 {
    if rate.is_finite() {
        rate.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

impl<T: Transport + Send> Transport for LossyTransport<T> {
    async fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        if self.rng.gen_bool(self.loss_rate) {
            self.dropped += 1;
            log::debug!("[sim] dropped {}-byte datagram", datagram.len());
            return Ok(());
        }
        self.inner.send(datagram).await?;
        if self.rng.gen_bool(self.duplicate_rate) {
            self.duplicated += 1;
            log::debug!("[sim] duplicated {}-byte datagram", datagram.len());
            self.inner.send(datagram).await?;
        }
        Ok(())
    }

    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.recv(buf).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        sent: Vec<Vec<u8>>,
    }

    impl Transport for Recorder {
        async fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
            self.sent.push(datagram.to_vec());
            Ok(())
        }

        async fn recv(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::ErrorKind::Unsupported.into())
        }
    }

    fn lossy(loss_rate: f64, duplicate_rate: f64, seed: u64) -> LossyTransport<Recorder> {
        LossyTransport::new(
            Recorder::default(),
            SimulatorConfig {
                loss_rate,
                duplicate_rate,
                seed,
            },
        )
    }

    #[tokio::test]
    async fn default_config_is_pass_through() {
        let mut sim = LossyTransport::new(Recorder::default(), SimulatorConfig::default());
        for i in 0..20u8 {
            sim.send(&[i]).await.unwrap();
        }
        assert_eq!(sim.dropped, 0);
        assert_eq!(sim.duplicated, 0);
        assert_eq!(sim.into_inner().sent.len(), 20);
    }

    #[tokio::test]
    async fn full_loss_drops_everything() {
        let mut sim = lossy(1.0, 1.0, 7);
        for _ in 0..10 {
            sim.send(b"x").await.unwrap();
        }
        assert_eq!(sim.dropped, 10);
        assert!(sim.into_inner().sent.is_empty());
    }

    #[tokio::test]
    async fn full_duplication_doubles_everything() {
        let mut sim = lossy(0.0, 1.0, 7);
        sim.send(b"a").await.unwrap();
        sim.send(b"b").await.unwrap();
        assert_eq!(sim.into_inner().sent, vec![b"a".to_vec(), b"a".to_vec(), b"b".to_vec(), b"b".to_vec()]);
    }

    #[tokio::test]
    async fn same_seed_same_faults() {
        let mut a = lossy(0.3, 0.3, 42);
        let mut b = lossy(0.3, 0.3, 42);
        for i in 0..100u8 {
            a.send(&[i]).await.unwrap();
            b.send(&[i]).await.unwrap();
        }
        assert_eq!(a.dropped, b.dropped);
        assert_eq!(a.into_inner().sent, b.into_inner().sent);
    }

    #[tokio::test]
    async fn out_of_range_rates_are_clamped() {
        let mut sim = lossy(-1.0, 5.0, 1);
        sim.send(b"z").await.unwrap();
        assert_eq!(sim.into_inner().sent.len(), 2);
    }

    #[tokio::test]
    async fn non_finite_rates_disable_the_fault() {
        let mut sim = lossy(f64::NAN, f64::INFINITY, 3);
        for i in 0..10u8 {
            sim.send(&[i]).await.unwrap();
        }
        assert_eq!(sim.dropped, 0);
        assert_eq!(sim.duplicated, 0);
        assert_eq!(sim.into_inner().sent.len(), 10);
    }
}
