//! Device fingerprint generation.
//!
//! The fingerprint is a non-cryptographic 32-bit hash over ambient platform
//! signals. It only has to be stable on one device/profile; equality across
//! devices is neither required nor wanted. Each signal read is isolated: a
//! source that is unavailable or fails is dropped and the hash is computed
//! from whatever remains.
//!
//! Components are hashed in a fixed order, joined by `|`:
//!
//! ```text
//! user-agent | language | cores | touch points | screen w | screen h |
//! color depth | pixel depth | tz offset | platform | plugins | canvas tail
//! ```

use anyhow::{Context, Result};
use thiserror::Error;

use crate::constants::{
    FINGERPRINT_CANVAS_CHARS, FINGERPRINT_PLUGIN_COUNT, FINGERPRINT_SEED, FINGERPRINT_SEPARATOR,
};

/// Screen metrics as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenInfo {
    /// Width in CSS pixels.
    pub width: u32,
    /// Height in CSS pixels.
    pub height: u32,
    /// Color depth in bits.
    pub color_depth: u32,
    /// Pixel depth in bits.
    pub pixel_depth: u32,
}

/// Ambient platform signals used as fingerprint entropy.
///
/// Every read may fail; the generator skips failed sources.
pub trait SignalSource {
    /// User agent string.
    fn user_agent(&self) -> Result<String>;
    /// Preferred language tag.
    fn language(&self) -> Result<String>;
    /// Logical core count.
    fn hardware_concurrency(&self) -> Result<u32>;
    /// Maximum simultaneous touch points.
    fn max_touch_points(&self) -> Result<u32>;
    /// Screen metrics.
    fn screen(&self) -> Result<ScreenInfo>;
    /// Minutes west of UTC (KST is `-540`).
    fn timezone_offset_minutes(&self) -> Result<i32>;
    /// Platform string.
    fn platform(&self) -> Result<String>;
    /// Installed plugin names, in platform order.
    fn plugin_names(&self) -> Result<Vec<String>>;
    /// Data URL of a rendered test canvas.
    fn canvas_data_url(&self) -> Result<String>;
}

/// Fingerprint generation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FingerprintError {
    /// Not a single entropy source could be read.
    #[error("no fingerprint entropy source was readable")]
    NoEntropy,
}

/// 32-bit fingerprint hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u32);

impl Fingerprint {
    /// Raw hash value.
    pub fn value(self) -> u32 {
        self.0
    }

    /// Lowercase hex without padding.
    pub fn to_hex(self) -> String {
        format!("{:x}", self.0)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// DJB2 variant: `hash = hash * 33 ^ unit`, over UTF-16 code units, wrapping
/// at 32 bits.
pub fn djb2_xor(input: &str) -> u32 {
    input.encode_utf16().fold(FINGERPRINT_SEED, |hash, unit| {
        hash.wrapping_shl(5).wrapping_add(hash) ^ u32::from(unit)
    })
}

/// Generate a fingerprint from the given signals.
pub fn generate(signals: &dyn SignalSource) -> Result<Fingerprint, FingerprintError> {
    let components = collect_components(signals);
    if components.is_empty() {
        return Err(FingerprintError::NoEntropy);
    }
    Ok(Fingerprint(djb2_xor(&components.join(FINGERPRINT_SEPARATOR))))
}

/// Read every source in order, dropping the ones that fail.
fn collect_components(signals: &dyn SignalSource) -> Vec<String> {
    let mut components = Vec::with_capacity(12);

    push_source(&mut components, "user_agent", signals.user_agent());
    push_source(&mut components, "language", signals.language());
    push_source(
        &mut components,
        "hardware_concurrency",
        signals.hardware_concurrency().map(|n| n.to_string()),
    );
    push_source(
        &mut components,
        "max_touch_points",
        signals.max_touch_points().map(|n| n.to_string()),
    );
    match signals.screen() {
        Ok(screen) => components.extend([
            screen.width.to_string(),
            screen.height.to_string(),
            screen.color_depth.to_string(),
            screen.pixel_depth.to_string(),
        ]),
        Err(e) => log::debug!("Fingerprint source screen skipped: {e:#}"),
    }
    push_source(
        &mut components,
        "timezone_offset",
        signals.timezone_offset_minutes().map(|m| m.to_string()),
    );
    push_source(&mut components, "platform", signals.platform());
    push_source(
        &mut components,
        "plugins",
        signals.plugin_names().map(|names| {
            names
                .into_iter()
                .take(FINGERPRINT_PLUGIN_COUNT)
                .collect::<Vec<_>>()
                .join(",")
        }),
    );
    push_source(
        &mut components,
        "canvas",
        signals.canvas_data_url().map(|url| canvas_tail(&url)),
    );

    components
}

fn push_source(components: &mut Vec<String>, name: &str, value: Result<String>) {
    match value {
        Ok(v) => components.push(v),
        Err(e) => log::debug!("Fingerprint source {name} skipped: {e:#}"),
    }
}

fn canvas_tail(url: &str) -> String {
    let count = url.chars().count();
    url.chars()
        .skip(count.saturating_sub(FINGERPRINT_CANVAS_CHARS))
        .collect()
}

/// Signals of the host running this process.
///
/// Touch, screen, plugin and canvas sources do not exist on a host and are
/// always skipped.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostSignals;

impl SignalSource for HostSignals {
    fn user_agent(&self) -> Result<String> {
        Ok(format!(
            "{}/{} ({}; {})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            std::env::consts::OS,
            std::env::consts::ARCH
        ))
    }

    fn language(&self) -> Result<String> {
        std::env::var("LC_ALL")
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| std::env::var("LANG").ok().filter(|v| !v.is_empty()))
            .context("no locale configured")
    }

    fn hardware_concurrency(&self) -> Result<u32> {
        let cores = std::thread::available_parallelism().context("core count unavailable")?;
        Ok(u32::try_from(cores.get()).unwrap_or(u32::MAX))
    }

    fn max_touch_points(&self) -> Result<u32> {
        anyhow::bail!("no touch input on host")
    }

    fn screen(&self) -> Result<ScreenInfo> {
        anyhow::bail!("no screen metrics on host")
    }

    fn timezone_offset_minutes(&self) -> Result<i32> {
        let offset = chrono::Local::now().offset().local_minus_utc();
        Ok(-offset / 60)
    }

    fn platform(&self) -> Result<String> {
        let host = hostname::get()
            .context("hostname unavailable")?
            .into_string()
            .map_err(|_raw| anyhow::anyhow!("hostname is not valid UTF-8"))?;
        Ok(format!(
            "{} {} {}",
            std::env::consts::OS,
            std::env::consts::ARCH,
            host
        ))
    }

    fn plugin_names(&self) -> Result<Vec<String>> {
        anyhow::bail!("no plugins on host")
    }

    fn canvas_data_url(&self) -> Result<String> {
        anyhow::bail!("no canvas on host")
    }
}

/// Signals fixed at construction; sources left as `None` fail on read.
///
/// Used by embedders that gather signals elsewhere and by tests.
#[derive(Debug, Default, Clone)]
pub struct StaticSignals {
    /// User agent string.
    pub user_agent: Option<String>,
    /// Preferred language tag.
    pub language: Option<String>,
    /// Logical core count.
    pub hardware_concurrency: Option<u32>,
    /// Maximum touch points.
    pub max_touch_points: Option<u32>,
    /// Screen metrics.
    pub screen: Option<ScreenInfo>,
    /// Minutes west of UTC.
    pub timezone_offset_minutes: Option<i32>,
    /// Platform string.
    pub platform: Option<String>,
    /// Plugin names.
    pub plugin_names: Option<Vec<String>>,
    /// Canvas data URL.
    pub canvas_data_url: Option<String>,
}

fn require<T: Clone>(value: &Option<T>, name: &str) -> Result<T> {
    value
        .clone()
        .with_context(|| format!("{name} unavailable"))
}

impl SignalSource for StaticSignals {
    fn user_agent(&self) -> Result<String> {
        require(&self.user_agent, "user agent")
    }

    fn language(&self) -> Result<String> {
        require(&self.language, "language")
    }

    fn hardware_concurrency(&self) -> Result<u32> {
        require(&self.hardware_concurrency, "hardware concurrency")
    }

    fn max_touch_points(&self) -> Result<u32> {
        require(&self.max_touch_points, "max touch points")
    }

    fn screen(&self) -> Result<ScreenInfo> {
        require(&self.screen, "screen")
    }

    fn timezone_offset_minutes(&self) -> Result<i32> {
        require(&self.timezone_offset_minutes, "timezone offset")
    }

    fn platform(&self) -> Result<String> {
        require(&self.platform, "platform")
    }

    fn plugin_names(&self) -> Result<Vec<String>> {
        require(&self.plugin_names, "plugins")
    }

    fn canvas_data_url(&self) -> Result<String> {
        require(&self.canvas_data_url, "canvas")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn browser_signals() -> StaticSignals {
        StaticSignals {
            user_agent: Some("Mozilla/5.0 (X11; Linux x86_64)".to_string()),
            language: Some("ko-KR".to_string()),
            hardware_concurrency: Some(8),
            max_touch_points: Some(0),
            screen: Some(ScreenInfo {
                width: 1920,
                height: 1080,
                color_depth: 24,
                pixel_depth: 24,
            }),
            timezone_offset_minutes: Some(-540),
            platform: Some("Linux x86_64".to_string()),
            plugin_names: Some(vec![
                "PDF Viewer".to_string(),
                "Chrome PDF Viewer".to_string(),
                "Chromium PDF Viewer".to_string(),
                "WebKit built-in PDF".to_string(),
            ]),
            canvas_data_url: Some(format!("data:image/png;base64,{}", "A".repeat(200))),
        }
    }

    #[test]
    fn test_djb2_known_values() {
        assert_eq!(djb2_xor(""), 5381);
        // 5381 * 33 = 177573; 177573 ^ 'a'(97) = 177604
        assert_eq!(djb2_xor("a"), 177_604);
        assert_eq!(format!("{:x}", djb2_xor("a")), "2b5c4");
    }

    #[test]
    fn test_djb2_wraps_instead_of_overflowing() {
        let long = "x".repeat(10_000);
        let _ = djb2_xor(&long);
    }

    #[test]
    fn test_djb2_hashes_utf16_units() {
        // Hangul syllables are single UTF-16 units
        let expected = FINGERPRINT_SEED.wrapping_mul(33) ^ 0xD55C;
        assert_eq!(djb2_xor("한"), expected);
    }

    #[test]
    fn test_generate_is_deterministic() {
        let signals = browser_signals();
        let a = generate(&signals).unwrap();
        let b = generate(&signals).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_hex(), a.to_string());
        assert!(a.to_hex().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_failed_sources_are_skipped() {
        let mut signals = browser_signals();
        signals.canvas_data_url = None;
        signals.plugin_names = None;
        let without_optional = generate(&signals).unwrap();

        assert_ne!(without_optional, generate(&browser_signals()).unwrap());
        assert_eq!(without_optional, generate(&signals).unwrap());
    }

    #[test]
    fn test_components_follow_documented_order() {
        let components = collect_components(&browser_signals());
        assert_eq!(components[0], "Mozilla/5.0 (X11; Linux x86_64)");
        assert_eq!(components[1], "ko-KR");
        assert_eq!(components[4..8], ["1920", "1080", "24", "24"]);
        assert_eq!(components[8], "-540");
        assert_eq!(components[10], "PDF Viewer,Chrome PDF Viewer,Chromium PDF Viewer");
        assert_eq!(components[11].chars().count(), FINGERPRINT_CANVAS_CHARS);
    }

    #[test]
    fn test_no_entropy_is_an_error() {
        assert_eq!(
            generate(&StaticSignals::default()),
            Err(FingerprintError::NoEntropy)
        );
    }

    #[test]
    fn test_host_signals_generate() {
        let a = generate(&HostSignals).unwrap();
        let b = generate(&HostSignals).unwrap();
        assert_eq!(a, b);
    }
}
