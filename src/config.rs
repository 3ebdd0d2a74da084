use std::time::Duration;

use crate::types::CipherSuite;
use crate::Error;

/// Smallest path MTU a session will run with: 512 minus IPv4 and UDP headers.
pub const MIN_MTU: usize = 512 - 20 - 8;

/// Session configuration.
///
/// Built once and shared by every session created with it.
#[derive(Debug, Clone)]
pub struct Config {
    mtu: usize,
    max_queue_rx: usize,
    max_queue_tx: usize,
    max_datagram_size: usize,
    flight_start_rto: Duration,
    flight_retries: usize,
    handshake_timeout: Duration,
    cookie_timeout: Duration,
    flood_threshold: usize,
    flood_pause: Duration,
    reorder: bool,
    reorder_window: u64,
    reorder_timeout: Duration,
    heartbeat_interval: Option<Duration>,
    heartbeat_tries: usize,
    heartbeat_timeout: Duration,
    cipher_suites: Vec<CipherSuite>,
    rng_seed: Option<u64>,
}

impl Config {
    /// Create a new configuration builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            mtu: 1150,
            max_queue_rx: 1000,
            max_queue_tx: 1000,
            max_datagram_size: 64 * 1024,
            flight_start_rto: Duration::from_secs(1),
            flight_retries: 4,
            handshake_timeout: Duration::from_secs(40),
            cookie_timeout: Duration::from_secs(10),
            flood_threshold: 4 * 1024,
            flood_pause: Duration::from_millis(100),
            reorder: false,
            reorder_window: 32,
            reorder_timeout: Duration::from_millis(1500),
            heartbeat_interval: Some(Duration::from_secs(30)),
            heartbeat_tries: 1,
            heartbeat_timeout: Duration::from_millis(700),
            cipher_suites: CipherSuite::supported().to_vec(),
            rng_seed: None,
        }
    }

    /// Max transmission unit.
    ///
    /// The largest datagram a session will produce. Sessions further clamp
    /// this to what the transport reports.
    #[inline(always)]
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Inbound datagram queue capacity.
    ///
    /// When full, the oldest queued datagram is dropped and counted.
    #[inline(always)]
    pub fn max_queue_rx(&self) -> usize {
        self.max_queue_rx
    }

    /// Max amount of plaintext sends buffered before the session is established.
    #[inline(always)]
    pub fn max_queue_tx(&self) -> usize {
        self.max_queue_tx
    }

    /// Inbound datagrams larger than this are dropped. Also caps the size of
    /// a reassembled handshake message.
    #[inline(always)]
    pub fn max_datagram_size(&self) -> usize {
        self.max_datagram_size
    }

    /// Time of first retry.
    ///
    /// Every flight restarts with this value.
    /// Doubled for every retry, with up to ±0.25s of jitter that never
    /// exceeds a quarter of the current timeout.
    #[inline(always)]
    pub fn flight_start_rto(&self) -> Duration {
        self.flight_start_rto
    }

    /// Max number of retries per flight.
    #[inline(always)]
    pub fn flight_retries(&self) -> usize {
        self.flight_retries
    }

    /// Timeout for the entire handshake, regardless of flights.
    #[inline(always)]
    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// How long a responder waits in the cookie exchange for a client hello.
    #[inline(always)]
    pub fn cookie_timeout(&self) -> Duration {
        self.cookie_timeout
    }

    /// Cookie-stage bytes after which every invalid packet is followed by
    /// [`Config::flood_pause`].
    #[inline(always)]
    pub fn flood_threshold(&self) -> usize {
        self.flood_threshold
    }

    #[inline(always)]
    pub fn flood_pause(&self) -> Duration {
        self.flood_pause
    }

    /// Whether application records are reordered by sequence number.
    ///
    /// Off means records are delivered in arrival order.
    #[inline(always)]
    pub fn reorder(&self) -> bool {
        self.reorder
    }

    /// Records further behind the delivery point than this are dropped.
    #[inline(always)]
    pub fn reorder_window(&self) -> u64 {
        self.reorder_window
    }

    /// How long a gap in the sequence is waited for before flushing.
    #[inline(always)]
    pub fn reorder_timeout(&self) -> Duration {
        self.reorder_timeout
    }

    /// Idle time on an established session before a heartbeat request is sent.
    #[inline(always)]
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_interval
    }

    /// Heartbeat requests sent before the peer is considered dead.
    #[inline(always)]
    pub fn heartbeat_tries(&self) -> usize {
        self.heartbeat_tries
    }

    /// Wait for each heartbeat response.
    #[inline(always)]
    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_timeout
    }

    /// Cipher suites in preference order.
    #[inline(always)]
    pub fn cipher_suites(&self) -> &[CipherSuite] {
        &self.cipher_suites
    }

    /// Seed for non-cryptographic randomness.
    #[inline(always)]
    pub fn rng_seed(&self) -> Option<u64> {
        self.rng_seed
    }
}

/// Builder for session configuration.
pub struct ConfigBuilder {
    mtu: usize,
    max_queue_rx: usize,
    max_queue_tx: usize,
    max_datagram_size: usize,
    flight_start_rto: Duration,
    flight_retries: usize,
    handshake_timeout: Duration,
    cookie_timeout: Duration,
    flood_threshold: usize,
    flood_pause: Duration,
    reorder: bool,
    reorder_window: u64,
    reorder_timeout: Duration,
    heartbeat_interval: Option<Duration>,
    heartbeat_tries: usize,
    heartbeat_timeout: Duration,
    cipher_suites: Vec<CipherSuite>,
    rng_seed: Option<u64>,
}

impl ConfigBuilder {
    /// Set the max transmission unit (MTU).
    ///
    /// Defaults to 1150. Must be at least [`MIN_MTU`].
    pub fn mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Set the inbound datagram queue capacity.
    ///
    /// Defaults to 1000.
    pub fn max_queue_rx(mut self, max_queue_rx: usize) -> Self {
        self.max_queue_rx = max_queue_rx;
        self
    }

    /// Set the max amount of plaintext sends buffered before establishment.
    ///
    /// Defaults to 1000.
    pub fn max_queue_tx(mut self, max_queue_tx: usize) -> Self {
        self.max_queue_tx = max_queue_tx;
        self
    }

    /// Set the largest inbound datagram accepted.
    ///
    /// Defaults to 64KiB.
    pub fn max_datagram_size(mut self, size: usize) -> Self {
        self.max_datagram_size = size;
        self
    }

    /// Set the time of first retry.
    ///
    /// Defaults to 1 second.
    pub fn flight_start_rto(mut self, rto: Duration) -> Self {
        self.flight_start_rto = rto;
        self
    }

    /// Set the max number of retries per flight.
    ///
    /// Defaults to 4.
    pub fn flight_retries(mut self, retries: usize) -> Self {
        self.flight_retries = retries;
        self
    }

    /// Set the timeout for the entire handshake, regardless of flights.
    ///
    /// Defaults to 40 seconds.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set how long a responder waits for a client hello.
    ///
    /// Defaults to 10 seconds.
    pub fn cookie_timeout(mut self, timeout: Duration) -> Self {
        self.cookie_timeout = timeout;
        self
    }

    /// Set the cookie-stage flood threshold in bytes.
    ///
    /// Defaults to 4096.
    pub fn flood_threshold(mut self, bytes: usize) -> Self {
        self.flood_threshold = bytes;
        self
    }

    /// Set the pause applied per invalid cookie packet past the threshold.
    ///
    /// Defaults to 100ms.
    pub fn flood_pause(mut self, pause: Duration) -> Self {
        self.flood_pause = pause;
        self
    }

    /// Enable reordering of application records.
    ///
    /// Defaults to false.
    pub fn reorder(mut self, enabled: bool) -> Self {
        self.reorder = enabled;
        self
    }

    /// Defaults to 32.
    pub fn reorder_window(mut self, window: u64) -> Self {
        self.reorder_window = window;
        self
    }

    /// Defaults to 1500ms.
    pub fn reorder_timeout(mut self, timeout: Duration) -> Self {
        self.reorder_timeout = timeout;
        self
    }

    /// Set the idle interval before a heartbeat request. `None` disables heartbeats.
    ///
    /// Defaults to 30 seconds.
    pub fn heartbeat_interval(mut self, interval: Option<Duration>) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Defaults to 1.
    pub fn heartbeat_tries(mut self, tries: usize) -> Self {
        self.heartbeat_tries = tries;
        self
    }

    /// Defaults to 700ms.
    pub fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    /// Set the cipher suites in preference order.
    ///
    /// Defaults to AES-128-GCM then AES-256-GCM.
    pub fn cipher_suites(mut self, suites: &[CipherSuite]) -> Self {
        self.cipher_suites = suites.to_vec();
        self
    }

    /// Seed non-cryptographic randomness for reproducible timers.
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<Config, Error> {
        if self.mtu < MIN_MTU {
            return Err(Error::Config(format!(
                "mtu {} is below the minimum of {}",
                self.mtu, MIN_MTU
            )));
        }
        if self.max_queue_rx == 0 {
            return Err(Error::Config("max_queue_rx must be at least 1".into()));
        }
        if self.heartbeat_tries == 0 {
            return Err(Error::Config("heartbeat_tries must be at least 1".into()));
        }
        if self.max_datagram_size < self.mtu {
            return Err(Error::Config(
                "max_datagram_size must not be smaller than the mtu".into(),
            ));
        }
        let cipher_suites: Vec<_> = self
            .cipher_suites
            .into_iter()
            .filter(|s| s.is_supported())
            .collect();
        if cipher_suites.is_empty() {
            return Err(Error::Config("no supported cipher suite configured".into()));
        }

        Ok(Config {
            mtu: self.mtu,
            max_queue_rx: self.max_queue_rx,
            max_queue_tx: self.max_queue_tx,
            max_datagram_size: self.max_datagram_size,
            flight_start_rto: self.flight_start_rto,
            flight_retries: self.flight_retries,
            handshake_timeout: self.handshake_timeout,
            cookie_timeout: self.cookie_timeout,
            flood_threshold: self.flood_threshold,
            flood_pause: self.flood_pause,
            reorder: self.reorder,
            reorder_window: self.reorder_window,
            reorder_timeout: self.reorder_timeout,
            heartbeat_interval: self.heartbeat_interval,
            heartbeat_tries: self.heartbeat_tries,
            heartbeat_timeout: self.heartbeat_timeout,
            cipher_suites,
            rng_seed: self.rng_seed,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::builder()
            .build()
            .expect("Default config should always validate")
    }
}
