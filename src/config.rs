use anyhow::bail;


pub const DEFAULT_STAGING_BUFFER_CAPACITY: usize = 2000;
pub const MIN_STAGING_BUFFER_CAPACITY: usize = 64;

pub struct BindingConfig {
    /// This is the size of the largest message that can be received. The engine is offered
    ///  exactly this many bytes on every receive; bigger messages are rejected with a status
    ///  code and stay queued in the engine.
    ///
    /// The engine splits messages into fragments by itself, so this bounds *messages*, not
    ///  datagrams.
    pub staging_buffer_capacity: usize,

    /// applied to every new session's engine right after creation - hosts can still
    ///  override this per session
    pub default_send_window: Option<i32>,
    pub default_recv_window: Option<i32>,

    pub default_timing: Option<TimingConfig>,
}

impl Default for BindingConfig {
    fn default() -> Self {
        BindingConfig {
            staging_buffer_capacity: DEFAULT_STAGING_BUFFER_CAPACITY,
            default_send_window: None,
            default_recv_window: None,
            default_timing: None,
        }
    }
}

impl BindingConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.staging_buffer_capacity < MIN_STAGING_BUFFER_CAPACITY {
            bail!("staging buffer capacity must be at least {} bytes", MIN_STAGING_BUFFER_CAPACITY);
        }
        // received lengths are reported to the host as i32
        if i32::try_from(self.staging_buffer_capacity).is_err() {
            bail!("staging buffer capacity must fit into an i32");
        }
        if matches!(self.default_send_window, Some(w) if w <= 0) {
            bail!("default send window must be positive");
        }
        if matches!(self.default_recv_window, Some(w) if w <= 0) {
            bail!("default receive window must be positive");
        }
        Ok(())
    }
}


/// the engine's timing parameters; negative values leave the engine's setting unchanged
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TimingConfig {
    pub nodelay: i32,
    pub interval_ms: i32,
    pub resend: i32,
    pub no_congestion_control: i32,
}

impl TimingConfig {
    /// the customary 'fast mode': no delay, 10ms internal interval, fast resend after 2 skips,
    ///  no congestion control
    pub fn fast() -> TimingConfig {
        TimingConfig {
            nodelay: 1,
            interval_ms: 10,
            resend: 2,
            no_congestion_control: 1,
        }
    }
}
