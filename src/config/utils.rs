use std::str::FromStr;
use std::time::Duration;

use super::Config;

impl Config {
    pub fn value<T: FromStr>(&self, key: &str) -> super::Result<Option<T>> {
        if let Some(value) = self.keys.get(key) {
            match T::from_str(value) {
                Ok(result) => Ok(Some(result)),
                Err(_) => Err(format!("Invalid value {:?} for key {:?}.", value, key)),
            }
        } else {
            Ok(None)
        }
    }

    pub fn property<T: FromStr>(&self, key: &str) -> super::Result<Option<T>> {
        self.value(key)
    }

    pub fn value_require<T: FromStr>(&self, key: &str) -> super::Result<T> {
        self.value(key)?
            .ok_or_else(|| format!("Missing required key {:?}.", key))
    }

    // Comma-separated list values, empty entries dropped.
    pub fn values<'x>(&'x self, key: &str) -> impl Iterator<Item = &'x str> {
        self.keys
            .get(key)
            .map(|v| v.as_str())
            .unwrap_or("")
            .split(',')
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn duration(&self, key: &str) -> super::Result<Option<Duration>> {
        if let Some(value) = self.keys.get(key) {
            parse_duration(value)
                .map(Some)
                .ok_or_else(|| format!("Invalid duration {:?} for key {:?}.", value, key))
        } else {
            Ok(None)
        }
    }

    pub fn sub_keys<'x, 'y: 'x>(&'y self, prefix: &'x str) -> impl Iterator<Item = &str> + 'x {
        let mut last_key = "";
        self.keys.keys().filter_map(move |key| {
            let key = key.strip_prefix(prefix)?.strip_prefix('.')?;
            let key = if let Some((key, _)) = key.split_once('.') {
                key
            } else {
                key
            };
            if last_key != key {
                last_key = key;
                Some(key)
            } else {
                None
            }
        })
    }
}

fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    let (digits, multiplier) = if let Some(v) = value.strip_suffix("ms") {
        return v.trim().parse::<u64>().ok().map(Duration::from_millis);
    } else if let Some(v) = value.strip_suffix('s') {
        (v, 1)
    } else if let Some(v) = value.strip_suffix('m') {
        (v, 60)
    } else if let Some(v) = value.strip_suffix('h') {
        (v, 3600)
    } else if let Some(v) = value.strip_suffix('d') {
        (v, 86400)
    } else {
        (value, 1)
    };
    digits
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| Duration::from_secs(secs * multiplier))
}
