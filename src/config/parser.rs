use std::collections::BTreeMap;

use super::Config;

impl Config {
    pub fn parse(contents: &str) -> super::Result<Self> {
        let mut keys = BTreeMap::new();
        let mut section = String::new();

        for (line_num, raw_line) in contents.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            } else if let Some(name) = line.strip_prefix('[') {
                section = name
                    .strip_suffix(']')
                    .ok_or_else(|| {
                        format!("Unterminated section name at line {}.", line_num + 1)
                    })?
                    .trim()
                    .to_string();
                if section.is_empty() {
                    return Err(format!("Empty section name at line {}.", line_num + 1));
                }
            } else if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                if key.is_empty() {
                    return Err(format!("Missing key name at line {}.", line_num + 1));
                }
                let key = if section.is_empty() {
                    key.to_string()
                } else {
                    format!("{}.{}", section, key)
                };
                let mut value = value.trim();
                if value.len() > 1
                    && ((value.starts_with('"') && value.ends_with('"'))
                        || (value.starts_with('\'') && value.ends_with('\'')))
                {
                    value = &value[1..value.len() - 1];
                }
                keys.insert(key, value.to_string());
            } else {
                return Err(format!("Invalid directive at line {}.", line_num + 1));
            }
        }

        Ok(Config { keys })
    }
}
