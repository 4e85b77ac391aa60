//! Work directories and command-line arguments for each role.

use std::collections::BTreeMap;
use std::collections::btree_map;
use std::fs;
use std::path::{Path, PathBuf};

use crate::instance::Role;
use crate::{ClusterOptions, Result};

/// Resolved launch arguments: `--key value` pairs plus raw trailing flags.
///
/// Raw flags carry options that may repeat (such as `--agency.endpoint`),
/// which a key/value map cannot express.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgMap {
    values: BTreeMap<String, String>,
    flags: Vec<String>,
}

impl ArgMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key`, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) -> &mut Self {
        self.values.insert(key.into(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Overlays `other` onto `self`; `other` wins on conflicting keys and its
    /// raw flags are appended.
    pub fn merge(&mut self, other: &ArgMap) -> &mut Self {
        for (key, value) in &other.values {
            self.values.insert(key.clone(), value.clone());
        }
        self.flags.extend(other.flags.iter().cloned());
        self
    }

    /// Appends a raw `--flag value` pair.
    pub fn push_flag(&mut self, flag: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.flags.push(flag.into());
        self.flags.push(value.into());
        self
    }

    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    /// Values of every raw occurrence of `flag`.
    pub fn flag_values<'a>(&'a self, flag: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.flags
            .chunks(2)
            .filter(move |pair| pair[0] == flag)
            .filter_map(|pair| pair.get(1).map(String::as_str))
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, String> {
        self.values.iter()
    }

    /// Renders `--key value` for every entry (sorted by key), then the raw flags.
    pub fn to_command_line(&self) -> Vec<String> {
        let mut line = Vec::with_capacity(self.values.len() * 2 + self.flags.len());
        for (key, value) in &self.values {
            line.push(format!("--{key}"));
            line.push(value.clone());
        }
        line.extend(self.flags.iter().cloned());
        line
    }
}

impl From<&BTreeMap<String, String>> for ArgMap {
    fn from(values: &BTreeMap<String, String>) -> Self {
        Self {
            values: values.clone(),
            flags: Vec::new(),
        }
    }
}

/// Hands out `<role>-<n>` directory names, unique per manager.
#[derive(Debug, Default)]
pub struct WorkDirNamer {
    next: u64,
}

impl WorkDirNamer {
    pub fn next_name(&mut self, role: Role) -> String {
        let name = format!("{}-{}", role.as_str(), self.next);
        self.next += 1;
        name
    }
}

/// Computes the work directory and launch arguments for one instance.
///
/// The directory is `root_dir/dir_name` and is created (with `apps/`,
/// `data/` and `tmp/` inside) if absent, so repeated calls are harmless.
/// Argument precedence, lowest first: role-independent defaults,
/// `options.extra_args`, then `overrides`.
pub fn build_role_args(
    dir_name: &str,
    root_dir: &Path,
    options: &ClusterOptions,
    overrides: &ArgMap,
) -> Result<(ArgMap, PathBuf)> {
    let work_dir = root_dir.join(dir_name);
    let apps_dir = work_dir.join("apps");
    let data_dir = work_dir.join("data");
    let tmp_dir = work_dir.join("tmp");

    for dir in [&apps_dir, &data_dir, &tmp_dir] {
        fs::create_dir_all(dir)?;
    }

    let mut args = ArgMap::new();
    args.set("javascript.app-path", apps_dir.display())
        .set("database.directory", data_dir.display())
        .set("temp.path", tmp_dir.display());
    args.merge(&ArgMap::from(&options.extra_args));
    args.merge(overrides);

    Ok((args, work_dir))
}
