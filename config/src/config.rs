// Copyright 2021 The Floscan Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration file management

use std::env;
use std::fs::File;
use std::io::prelude::*;
use std::path::PathBuf;

use dirs;
use toml;

use crate::types::{ConfigError, GlobalConfig};

/// Base directory under the user's home dir.
const SCANNER_HOME: &str = ".floscan";
/// The default config file name.
const CONFIG_FILE_NAME: &str = "floscan.toml";

fn get_scanner_path() -> Result<PathBuf, ConfigError> {
	let mut scanner_path = match dirs::home_dir() {
		Some(p) => p,
		None => PathBuf::new(),
	};
	scanner_path.push(SCANNER_HOME);
	Ok(scanner_path)
}

fn check_config_current_dir() -> Option<PathBuf> {
	let p = env::current_dir();
	let mut c = match p {
		Ok(c) => c,
		Err(_) => return None,
	};
	c.push(CONFIG_FILE_NAME);
	if c.exists() {
		return Some(c);
	}
	None
}

/// Whether a config file exists in either of the discovered locations.
pub fn config_file_exists() -> bool {
	if check_config_current_dir().is_some() {
		return true;
	}
	match get_scanner_path() {
		Ok(mut p) => {
			p.push(CONFIG_FILE_NAME);
			p.exists()
		}
		Err(_) => false,
	}
}

/// Handles setup and detection of paths for the scanner: use a config
/// file in the current dir when there is one, fall back to
/// ~/.floscan/floscan.toml, and generate a default file there on first
/// run.
pub fn initial_setup() -> Result<GlobalConfig, ConfigError> {
	// Use config file if current directory if it exists
	if let Some(p) = check_config_current_dir() {
		GlobalConfig::new(&p)
	} else {
		// Check if the scanner home dir exists
		let scanner_path = get_scanner_path()?;
		if !scanner_path.exists() {
			std::fs::create_dir_all(&scanner_path)?;
		}

		let mut config_path = scanner_path;
		config_path.push(CONFIG_FILE_NAME);

		if config_path.exists() {
			GlobalConfig::new(&config_path)
		} else {
			let mut default_config = GlobalConfig::default();
			default_config.config_file_path = Some(config_path.clone());
			default_config.write_to_file(config_path.to_str().unwrap())?;
			Ok(default_config)
		}
	}
}

impl GlobalConfig {
	/// Requires the path to a config file.
	pub fn new(path: &PathBuf) -> Result<GlobalConfig, ConfigError> {
		let mut return_value = GlobalConfig::default();
		return_value.config_file_path = Some(path.clone());

		// Config file path is given but not valid
		let config_file = return_value.config_file_path.clone().unwrap();
		if !config_file.exists() {
			return Err(ConfigError::FileNotFoundError(String::from(
				config_file.to_str().unwrap(),
			)));
		}

		// Try to parse the config file if it exists, explode if it does
		// exist but something's wrong with it
		return_value.read_config()
	}

	fn read_config(self) -> Result<GlobalConfig, ConfigError> {
		let config_file_path = self.config_file_path.clone().unwrap();
		let mut file = File::open(&config_file_path)?;
		let mut contents = String::new();
		file.read_to_string(&mut contents)?;
		let decoded: Result<GlobalConfig, toml::de::Error> = toml::from_str(&contents);
		match decoded {
			Ok(mut gc) => {
				gc.config_file_path = self.config_file_path;
				gc.using_config_file = true;
				Ok(gc)
			}
			Err(e) => Err(ConfigError::ParseError(
				String::from(config_file_path.to_str().unwrap()),
				format!("{}", e),
			)),
		}
	}

	/// Serialize the config members into a TOML string.
	pub fn ser_config(&self) -> Result<String, ConfigError> {
		toml::to_string(self).map_err(|e| ConfigError::SerializationError(format!("{}", e)))
	}

	/// Write the config to the provided file path.
	pub fn write_to_file(&self, name: &str) -> Result<(), ConfigError> {
		let conf_out = self.ser_config()?;
		let mut file = File::create(name)?;
		file.write_all(conf_out.as_bytes())?;
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::scanner::Seeding;
	use floscan_core::global::ChainTypes;

	#[test]
	fn read_config_from_toml() {
		let toml_str = r#"
			[members.scanner]
			chain_type = "Testnet"
			max_peers = 50
			seeding_type = "List"
			seeds = ["198.51.100.1:17312"]
			reorg_trigger_length = 6

			[members.logging]
			log_to_stdout = true
			stdout_log_level = "Info"
			log_to_file = false
			file_log_level = "Debug"
			log_file_path = "floscan.log"
			log_file_append = true
		"#;

		let decoded: GlobalConfig = toml::from_str(toml_str).unwrap();
		let scanner = &decoded.members.scanner;
		assert_eq!(scanner.chain_type, ChainTypes::Testnet);
		assert_eq!(scanner.max_peers, 50);
		assert_eq!(scanner.seeding_type, Seeding::List);
		assert_eq!(scanner.reorg_trigger_length, 6);
		// untouched fields keep their defaults
		assert_eq!(scanner.reorg_tip_maxage, 25);
		assert!(decoded.members.logging.is_some());
	}

	#[test]
	fn default_config_round_trips() {
		let config = GlobalConfig::default();
		let serialized = config.ser_config().unwrap();
		let decoded: GlobalConfig = toml::from_str(&serialized).unwrap();
		assert_eq!(
			decoded.members.scanner.max_peers,
			config.members.scanner.max_peers
		);
	}
}
