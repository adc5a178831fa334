#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Terminal plumbing shared by the cartoforge binaries.
//!
//! Ingestion and generation report progress through [`ProgressCallback`];
//! [`IndicatifProgress`] draws those reports as `indicatif` bars. Log lines
//! go through [`init_logger`], which routes `pretty_env_logger` output
//! around the bars so the two never interleave on screen.

use std::sync::Arc;
use std::time::Duration;

use cartoforge_ingest::progress::ProgressCallback;
use indicatif::{ProgressBar, ProgressStyle};

pub use indicatif::MultiProgress;

const SPINNER_TEMPLATE: &str = "{spinner:.cyan} {msg}";
const LAYERS_TEMPLATE: &str = "  {msg} {wide_bar:.cyan/dim} {pos}/{len} {percent}% [{eta}]";
const STEPS_TEMPLATE: &str = "{msg} {wide_bar:.green/dim} {pos}/{len} [{elapsed_precise}]";
const BAR_CHARS: &str = "##-";

/// Progress reports drawn on a terminal bar.
pub struct IndicatifProgress {
    bar: ProgressBar,
    /// Applied by `set_total`, when the length becomes known.
    sized_style: ProgressStyle,
}

impl IndicatifProgress {
    /// Bar for the layers of an uploaded archive.
    ///
    /// Spins until [`ProgressCallback::set_total`] reports how many
    /// shapefiles extraction found.
    #[must_use]
    pub fn layers_bar(multi: &MultiProgress, message: &str) -> Arc<dyn ProgressCallback> {
        Arc::new(Self::spinning(multi, message))
    }

    /// Bar over `total` known steps, such as the pending templates of one
    /// generation pass.
    #[must_use]
    pub fn steps_bar(
        multi: &MultiProgress,
        message: &str,
        total: u64,
    ) -> Arc<dyn ProgressCallback> {
        Arc::new(Self::counting(multi, message, total))
    }

    fn spinning(multi: &MultiProgress, message: &str) -> Self {
        let bar = multi.add(ProgressBar::new_spinner());
        bar.enable_steady_tick(Duration::from_millis(100));
        bar.set_style(
            ProgressStyle::with_template(SPINNER_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(message.to_string());
        Self {
            bar,
            sized_style: sized_style(LAYERS_TEMPLATE),
        }
    }

    fn counting(multi: &MultiProgress, message: &str, total: u64) -> Self {
        let bar = multi.add(ProgressBar::new(total));
        let style = sized_style(STEPS_TEMPLATE);
        bar.set_style(style.clone());
        bar.set_message(message.to_string());
        Self {
            bar,
            sized_style: style,
        }
    }
}

fn sized_style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars(BAR_CHARS)
}

impl ProgressCallback for IndicatifProgress {
    fn set_total(&self, total: u64) {
        self.bar.set_length(total);
        self.bar.set_position(0);
        self.bar.set_style(self.sized_style.clone());
    }

    fn set_position(&self, pos: u64) {
        self.bar.set_position(pos);
    }

    fn inc(&self, delta: u64) {
        self.bar.inc(delta);
    }

    fn set_message(&self, msg: String) {
        self.bar.set_message(msg);
    }

    fn finish(&self, msg: String) {
        self.bar.finish_with_message(msg);
    }

    fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

/// Installs the global logger and returns the [`MultiProgress`] every bar
/// of the run has to join.
///
/// Filtering follows `RUST_LOG`. A logger installed earlier, as happens
/// across tests, is kept.
#[must_use]
pub fn init_logger() -> MultiProgress {
    let multi = MultiProgress::new();

    let logger = pretty_env_logger::formatted_builder()
        .parse_env("RUST_LOG")
        .build();
    let level = logger.filter();

    if indicatif_log_bridge::LogWrapper::new(multi.clone(), logger)
        .try_init()
        .is_ok()
    {
        log::set_max_level(level);
    }

    multi
}
