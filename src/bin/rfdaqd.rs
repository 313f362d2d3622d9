//! Daemon entry point.
//!
//! Brings the board up once, then serves one host session after another.
//! Built with the `hardware` feature the process drives the real board
//! through the vendor driver; without it a free-running simulated board
//! stands in so the host-side client can be developed anywhere.

use anyhow::Context as _;

use rfdaq::Config;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::default();

    #[cfg(feature = "hardware")]
    {
        let board = rfdaq::hardware::rp::VendorBoard::init()
            .context("board initialisation failed")?;
        rfdaq::net::listen(&board, &config).context("session server failed")?;
    }

    #[cfg(not(feature = "hardware"))]
    {
        log::warn!("built without the `hardware` feature; serving a simulated board");
        // Synthetic sample clock: the production rate of the board at the
        // default decimation.
        let samples_per_second = rfdaq::hardware::design_parameters::ADC_CLOCK_HZ
            / f64::from(config.decimation);
        let board = rfdaq::hardware::sim::SimBoard::free_running(samples_per_second);
        rfdaq::net::listen(&board, &config).context("session server failed")?;
    }

    Ok(())
}
