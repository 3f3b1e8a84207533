//! # options
//! Runtime configuration from the `ASAN_OPTIONS` environment variable:
//! comma- or space-separated `key=value` pairs, numeric values throughout
//! (booleans are 0/1). Unknown keys are ignored so newer instrumented
//! binaries keep working against older runtimes.
use thiserror::Error;

/// Frames captured per allocation/free site; `malloc_context_size` is
/// clamped to this.
pub const MAX_MALLOC_CONTEXT: usize = 30;

pub const MIN_REDZONE: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub malloc_context_size: usize,
    pub verbosity: u32,
    pub redzone: usize,
    pub quarantine_size: usize,
    pub poison_shadow: bool,
    pub report_globals: u32,
    pub large_malloc: usize,
    pub lazy_shadow: bool,
    pub handle_segv: bool,
    pub stats: bool,
    pub symbolize: bool,
    pub demangle: bool,
    pub debug: bool,
    pub fast_unwind: bool,
    pub mt: bool,
    pub atexit: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            malloc_context_size: MAX_MALLOC_CONTEXT,
            verbosity: 0,
            redzone: 128,
            quarantine_size: 1 << 28,
            poison_shadow: true,
            report_globals: 1,
            large_malloc: 1 << 31,
            lazy_shadow: false,
            handle_segv: true,
            stats: false,
            symbolize: true,
            demangle: true,
            debug: false,
            fast_unwind: true,
            mt: true,
            atexit: false,
        }
    }
}

impl Options {
    /// Parse an `ASAN_OPTIONS` string on top of the defaults.
    pub fn parse(input: &str) -> Result<Options, OptionsError> {
        let mut options = Options::default();
        for pair in input.split([',', ' ']).filter(|p| !p.is_empty()) {
            let Some((key, value)) = pair.split_once('=') else {
                return Err(OptionsError::MalformedPair);
            };
            let number = value
                .parse::<u64>()
                .map_err(|_| OptionsError::InvalidValue)?;
            let flag = number != 0;
            match key {
                "malloc_context_size" => {
                    options.malloc_context_size = (number as usize).min(MAX_MALLOC_CONTEXT);
                }
                "verbosity" => options.verbosity = number as u32,
                "redzone" => options.redzone = number as usize,
                "quarantine_size" => options.quarantine_size = number as usize,
                "poison_shadow" => options.poison_shadow = flag,
                "report_globals" => options.report_globals = number as u32,
                "large_malloc" => options.large_malloc = number as usize,
                "lazy_shadow" => options.lazy_shadow = flag,
                "handle_segv" => options.handle_segv = flag,
                "stats" => options.stats = flag,
                "symbolize" => options.symbolize = flag,
                "demangle" => options.demangle = flag,
                "debug" => options.debug = flag,
                "fast_unwind" => options.fast_unwind = flag,
                "mt" => options.mt = flag,
                "atexit" => options.atexit = flag,
                _ => {}
            }
        }
        options.validate()?;
        Ok(options)
    }

    fn validate(&self) -> Result<(), OptionsError> {
        if self.redzone < MIN_REDZONE || !self.redzone.is_power_of_two() {
            return Err(OptionsError::InvalidRedzone(self.redzone));
        }
        if self.lazy_shadow && !self.handle_segv {
            return Err(OptionsError::LazyShadowWithoutSegv);
        }
        Ok(())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum OptionsError {
    #[error("Options must be key=value pairs")]
    MalformedPair,
    #[error("Option values must be numeric")]
    InvalidValue,
    #[error("redzone must be a power of two >= 32, got {0}")]
    InvalidRedzone(usize),
    #[error("lazy_shadow requires handle_segv")]
    LazyShadowWithoutSegv,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = Options::default();
        assert_eq!(options.redzone, 128);
        assert_eq!(options.quarantine_size, 1 << 28);
        assert_eq!(options.large_malloc, 1 << 31);
        assert!(options.handle_segv);
        assert!(!options.lazy_shadow);
    }

    #[test]
    fn parses_comma_and_space_separated() {
        let options = Options::parse("redzone=64,verbosity=2 stats=1").unwrap();
        assert_eq!(options.redzone, 64);
        assert_eq!(options.verbosity, 2);
        assert!(options.stats);
    }

    #[test]
    fn clamps_malloc_context_size() {
        let options = Options::parse("malloc_context_size=1000").unwrap();
        assert_eq!(options.malloc_context_size, MAX_MALLOC_CONTEXT);
    }

    #[test]
    fn ignores_unknown_keys() {
        let options = Options::parse("no_such_flag=1").unwrap();
        assert_eq!(options, Options::default());
    }

    #[test]
    fn rejects_bad_redzone() {
        assert_eq!(
            Options::parse("redzone=48"),
            Err(OptionsError::InvalidRedzone(48))
        );
        assert_eq!(
            Options::parse("redzone=16"),
            Err(OptionsError::InvalidRedzone(16))
        );
    }

    #[test]
    fn lazy_shadow_requires_segv_handler() {
        assert_eq!(
            Options::parse("lazy_shadow=1,handle_segv=0"),
            Err(OptionsError::LazyShadowWithoutSegv)
        );
        assert!(Options::parse("lazy_shadow=1").is_ok());
    }
}
