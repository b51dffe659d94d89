//! Configuration handling for the PALS CLI
//!
//! Settings come from a `pals.toml` file (or `--config <file>`); every
//! field has its own default so partial files are fine. Command line flags
//! are applied on top by the subcommands.

use anyhow::{Context, Result};
use pals_core::index::MAX_WORD_SIZE;
use pals_core::{AlignerConfig, Alphabet, Encoding, MorassConfig, OutputFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub dp: DpConfig,
    #[serde(default)]
    pub morass: MorassSettings,
    #[serde(default)]
    pub run: RunConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Minimum hit length for the filter
    #[serde(default = "default_filter_len")]
    pub len: usize,

    /// Minimum hit identity for the filter
    #[serde(default = "default_filter_id")]
    pub id: f64,

    /// Tube offset, 0 selects it automatically
    #[serde(default)]
    pub tube_offset: usize,

    /// Largest word size the optimiser may choose
    #[serde(default = "default_max_k")]
    pub max_k: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DpConfig {
    /// Minimum hit length for extension, 0 uses the filter length
    #[serde(default)]
    pub len: usize,

    /// Minimum hit identity for extension, 0 uses the filter identity
    #[serde(default)]
    pub id: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MorassSettings {
    /// Directory for spilled seed runs, defaults to the system temp dir
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,

    /// Seeds held in memory before a run is spilled
    #[serde(default = "default_chunk")]
    pub chunk: usize,

    /// Sort and spill on a background thread
    #[serde(default)]
    pub concurrent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Memory ceiling in bytes for the optimiser, 0 is unlimited
    #[serde(default)]
    pub max_memory: usize,

    #[serde(default)]
    pub format: OutputFormat,

    #[serde(default)]
    pub alphabet: Alphabet,

    #[serde(default)]
    pub encoding: Encoding,
}

fn default_filter_len() -> usize { 400 }
fn default_filter_id() -> f64 { 0.94 }
fn default_max_k() -> usize { MAX_WORD_SIZE }
fn default_chunk() -> usize { MorassConfig::default().chunk_size }
fn default_threads() -> usize { 1 }

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            len: default_filter_len(),
            id: default_filter_id(),
            tube_offset: 0,
            max_k: default_max_k(),
        }
    }
}

impl Default for MorassSettings {
    fn default() -> Self {
        Self {
            temp_dir: None,
            chunk: default_chunk(),
            concurrent: false,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            max_memory: 0,
            format: OutputFormat::default(),
            alphabet: Alphabet::default(),
            encoding: Encoding::default(),
        }
    }
}

impl Config {
    /// Load configuration from file or use defaults
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let config = match config_path {
            Some(path) => {
                log::info!("Loading configuration from: {}", path.display());
                Self::load_from_file(path)?
            }
            None => {
                let default_path = PathBuf::from("pals.toml");
                if default_path.exists() {
                    log::info!("Loading configuration from: pals.toml");
                    Self::load_from_file(&default_path)?
                } else {
                    log::debug!("Using default configuration");
                    Self::default()
                }
            }
        };

        Ok(config)
    }

    /// Load configuration from a specific TOML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse configuration file: {}", path.display()))?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write configuration file: {}", path.display()))?;

        Ok(())
    }

    /// Generate example configuration file content
    pub fn example_toml() -> Result<String> {
        toml::to_string_pretty(&Self::default()).context("Failed to serialize default configuration")
    }

    /// Aligner settings as given by the file, before command line overrides.
    pub fn aligner_config(&self) -> AlignerConfig {
        let mut morass = MorassConfig {
            chunk_size: self.morass.chunk,
            concurrent: self.morass.concurrent,
            ..MorassConfig::default()
        };
        if let Some(dir) = &self.morass.temp_dir {
            morass.temp_dir = dir.clone();
        }

        AlignerConfig {
            filter_len: self.filter.len,
            filter_id: self.filter.id,
            dp_len: self.dp.len,
            dp_id: self.dp.id,
            tube_offset: (self.filter.tube_offset > 0).then_some(self.filter.tube_offset),
            max_word_size: self.filter.max_k,
            threads: self.run.threads,
            max_memory: (self.run.max_memory > 0).then_some(self.run.max_memory),
            morass,
            ..AlignerConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.filter.len, 400);
        assert_eq!(config.filter.id, 0.94);
        assert_eq!(config.run.threads, 1);
        assert_eq!(config.run.format, OutputFormat::Gff);
    }

    #[test]
    fn test_config_roundtrip() -> Result<()> {
        let mut config = Config::default();
        config.filter.len = 250;
        config.run.encoding = Encoding::TwoBit;
        let temp_file = NamedTempFile::new()?;

        config.save_to_file(temp_file.path())?;
        let loaded = Config::load_from_file(temp_file.path())?;

        assert_eq!(loaded.filter.len, 250);
        assert_eq!(loaded.run.encoding, Encoding::TwoBit);
        assert_eq!(loaded.morass.chunk, config.morass.chunk);

        Ok(())
    }

    #[test]
    fn test_partial_file_keeps_defaults() -> Result<()> {
        let config: Config = toml::from_str(
            "[dp]\nid = 0.9\n\n[run]\nformat = \"pairwise\"\nalphabet = \"dnaiupac\"\n",
        )?;
        assert_eq!(config.dp.id, 0.9);
        assert_eq!(config.dp.len, 0);
        assert_eq!(config.filter.len, 400);
        assert_eq!(config.run.format, OutputFormat::Pairwise);
        assert_eq!(config.run.alphabet, Alphabet::DnaIupac);
        assert_eq!(config.run.threads, 1);
        Ok(())
    }

    #[test]
    fn test_zero_means_automatic() {
        let mut config = Config::default();
        let aligner = config.aligner_config();
        assert_eq!(aligner.tube_offset, None);
        assert_eq!(aligner.max_memory, None);

        config.filter.tube_offset = 24;
        config.run.max_memory = 1 << 30;
        config.morass.temp_dir = Some(PathBuf::from("/scratch"));
        let aligner = config.aligner_config();
        assert_eq!(aligner.tube_offset, Some(24));
        assert_eq!(aligner.max_memory, Some(1 << 30));
        assert_eq!(aligner.morass.temp_dir, PathBuf::from("/scratch"));
    }

    #[test]
    fn test_bad_field_type_rejected() {
        let result: std::result::Result<Config, _> = toml::from_str("[filter]\nlen = \"long\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_example_toml_generation() -> Result<()> {
        let example = Config::example_toml()?;
        assert!(example.contains("[filter]"));
        assert!(example.contains("[dp]"));
        assert!(example.contains("[morass]"));
        assert!(example.contains("[run]"));
        Ok(())
    }
}
