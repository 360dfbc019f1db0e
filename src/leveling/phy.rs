//! The register-level PHY interface the leveling engine drives.

use super::LevelingError;

/// Delay-line and test-pattern access of a DRAM PHY.
///
/// Lanes are byte lanes (`modules`), numbered from zero. Delay lines only
/// move by reset and single-tap increments; after each increment the
/// engine polls [`delay_ready`](LevelingPhy::delay_ready).
pub trait LevelingPhy {
    /// Number of byte lanes.
    fn modules(&self) -> usize;
    /// Taps per delay line.
    fn delays(&self) -> usize;
    /// Bitslip positions per lane.
    fn bitslips(&self) -> usize;

    /// Enters or leaves write-leveling mode.
    fn wlevel_enable(&mut self, enable: bool);
    /// Resets a lane's write delay to zero.
    fn wdly_rst(&mut self, lane: usize);
    /// Increments a lane's write delay by one tap.
    fn wdly_inc(&mut self, lane: usize);
    /// Issues one write-leveling strobe on every lane.
    fn wlevel_strobe(&mut self);
    /// Samples a lane's write-leveling feedback after a strobe.
    fn wlevel_status(&mut self, lane: usize) -> bool;

    /// Resets the command/clock delay.
    fn cdly_rst(&mut self);
    /// Increments the command/clock delay by one tap.
    fn cdly_inc(&mut self);

    /// Resets a lane's read delay.
    fn rdly_rst(&mut self, lane: usize);
    /// Increments a lane's read delay by one tap.
    fn rdly_inc(&mut self, lane: usize);
    /// Resets a lane's bitslip.
    fn bitslip_rst(&mut self, lane: usize);
    /// Advances a lane's bitslip by one position.
    fn bitslip_inc(&mut self, lane: usize);

    /// Writes a test pattern through a lane into `row`.
    fn write_pattern(&mut self, row: u32, lane: usize, data: &[u8]);
    /// Reads `len` bytes of `row` back through a lane.
    fn read_pattern(&mut self, row: u32, lane: usize, len: usize) -> Vec<u8>;

    /// Returns true once the last delay change has settled.
    fn delay_ready(&mut self) -> bool;
}

/// Polls `delay_ready` at most `retries + 1` times.
pub fn wait_ready(
    phy: &mut dyn LevelingPhy,
    retries: u32,
    what: &'static str,
    lane: Option<usize>,
) -> Result<(), LevelingError> {
    for _ in 0..=retries {
        if phy.delay_ready() {
            return Ok(());
        }
        std::hint::spin_loop();
    }
    tracing::error!(what, ?lane, retries, "delay line not ready");
    Err(LevelingError::Timeout { what, lane })
}

/// Sets a lane's write delay to `taps`.
pub fn set_write_delay(
    phy: &mut dyn LevelingPhy,
    lane: usize,
    taps: usize,
    retries: u32,
) -> Result<(), LevelingError> {
    phy.wdly_rst(lane);
    for _ in 0..taps {
        phy.wdly_inc(lane);
        wait_ready(phy, retries, "write delay", Some(lane))?;
    }
    Ok(())
}

/// Sets a lane's read delay to `taps`.
pub fn set_read_delay(
    phy: &mut dyn LevelingPhy,
    lane: usize,
    taps: usize,
    retries: u32,
) -> Result<(), LevelingError> {
    phy.rdly_rst(lane);
    for _ in 0..taps {
        phy.rdly_inc(lane);
        wait_ready(phy, retries, "read delay", Some(lane))?;
    }
    Ok(())
}

/// Sets a lane's bitslip.
pub fn set_bitslip(phy: &mut dyn LevelingPhy, lane: usize, bitslip: usize) {
    phy.bitslip_rst(lane);
    for _ in 0..bitslip {
        phy.bitslip_inc(lane);
    }
}

/// Sets the command delay to `taps`.
pub fn set_cmd_delay(
    phy: &mut dyn LevelingPhy,
    taps: usize,
    retries: u32,
) -> Result<(), LevelingError> {
    phy.cdly_rst();
    for _ in 0..taps {
        phy.cdly_inc();
        wait_ready(phy, retries, "command delay", None)?;
    }
    Ok(())
}
