// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Tracing runtime control.

use ordermap::{OrderMap, OrderSet};
use parking_lot::Mutex;
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, Registry, filter::LevelFilter, prelude::*, reload};

use crate::targets::TRACING_TARGETS;
use crate::trace_target;

trace_target!("tracectl", LevelFilter::INFO, &[]);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TraceCtlError {
    #[error("invalid syntax '{0}': expected tag=level")]
    Syntax(String),
    #[error("invalid level '{0}'")]
    Level(String),
    #[error("unknown tag '{0}'")]
    UnknownTag(String),
}

#[derive(Debug, Clone)]
pub struct TargetCfg {
    pub(crate) target: &'static str,
    pub(crate) name: &'static str,
    pub(crate) level: LevelFilter,
    pub(crate) tags: Vec<&'static str>,
}

impl TargetCfg {
    fn new(
        target: &'static str,
        name: &'static str,
        level: LevelFilter,
        tags: &'static [&'static str],
    ) -> Self {
        // a target can always be addressed by its name
        let mut tags = tags.to_vec();
        if !tags.contains(&name) {
            tags.push(name);
        }
        Self {
            target,
            name,
            level,
            tags,
        }
    }
    #[must_use]
    pub fn target(&self) -> &'static str {
        self.target
    }
    #[must_use]
    pub fn level(&self) -> LevelFilter {
        self.level
    }
}

#[derive(Debug)]
pub(crate) struct TargetCfgDb {
    pub(crate) level: LevelFilter,
    pub(crate) targets: OrderMap<&'static str, TargetCfg>,
    pub(crate) tags: OrderMap<&'static str, OrderSet<&'static str>>,
}

impl TargetCfgDb {
    fn new(level: LevelFilter) -> Self {
        let mut db = Self {
            level,
            targets: OrderMap::new(),
            tags: OrderMap::new(),
        };
        for t in TRACING_TARGETS {
            db.register(t.target, t.name, t.level, t.tags);
        }
        db
    }

    fn register(
        &mut self,
        target: &'static str,
        name: &'static str,
        level: LevelFilter,
        tags: &'static [&'static str],
    ) {
        let cfg = TargetCfg::new(target, name, level, tags);
        for tag in &cfg.tags {
            self.tags.entry(*tag).or_default().insert(target);
        }
        if self.targets.insert(target, cfg).is_some() {
            warn!("Target {target} is declared more than once");
        }
    }

    fn env_filter(&self) -> EnvFilter {
        self.targets.values().fold(
            EnvFilter::new(self.level.to_string()),
            |filter, t| match format!("{}={}", t.target, t.level).parse() {
                Ok(directive) => filter.add_directive(directive),
                Err(e) => {
                    warn!("Skipping bad directive for {}: {e}", t.target);
                    filter
                }
            },
        )
    }

    fn set_tag_level(&mut self, tag: &str, level: LevelFilter) -> Result<usize, TraceCtlError> {
        let Some(members) = self.tags.get(tag) else {
            return Err(TraceCtlError::UnknownTag(tag.to_string()));
        };
        let mut changed = 0;
        for target in members {
            if let Some(cfg) = self.targets.get_mut(target)
                && cfg.level != level
            {
                cfg.level = level;
                changed += 1;
            }
        }
        Ok(changed)
    }

    fn as_config_string(&self) -> String {
        self.targets
            .values()
            .fold(format!("default={}", self.level), |mut out, t| {
                out += &format!(",{}={}", t.name, t.level);
                out
            })
    }
}

pub struct TracingControl {
    db: Mutex<TargetCfgDb>,
    reload_filter: Option<reload::Handle<EnvFilter, Registry>>,
}

impl TracingControl {
    fn new() -> Self {
        let db = TargetCfgDb::new(LevelFilter::INFO);
        let (filter, handle) = reload::Layer::new(db.env_filter());
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_line_number(true)
            .with_target(true)
            .with_thread_names(true)
            .with_level(true);

        // a subscriber may already be installed (e.g. by a test harness)
        let reload_filter = match tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
        {
            Ok(()) => Some(handle),
            Err(e) => {
                warn!("Tracing subscriber not installed: {e}");
                None
            }
        };
        Self {
            db: Mutex::new(db),
            reload_filter,
        }
    }

    fn reload(&self, db: &TargetCfgDb) {
        if let Some(handle) = &self.reload_filter
            && let Err(e) = handle.reload(db.env_filter())
        {
            warn!("Failed to reload tracing filter: {e}");
        }
    }

    /// Set the level of all the targets carrying `tag`.
    ///
    /// # Errors
    ///
    /// Fails if no target carries that tag.
    pub fn set_tag_level(&self, tag: &str, level: LevelFilter) -> Result<(), TraceCtlError> {
        let mut db = self.db.lock();
        let changed = db.set_tag_level(tag, level)?;
        if changed > 0 {
            self.reload(&db);
        }
        info!("Log level for tag '{tag}' set to {level} ({changed} targets changed)");
        Ok(())
    }

    pub fn set_level_all(&self, level: LevelFilter) {
        let mut db = self.db.lock();
        db.targets.values_mut().for_each(|t| t.level = level);
        self.reload(&db);
    }

    pub fn set_default_level(&self, level: LevelFilter) {
        let mut db = self.db.lock();
        if db.level != level {
            db.level = level;
            self.reload(&db);
        }
    }

    fn parse_config(input: &str) -> Result<OrderMap<&str, LevelFilter>, TraceCtlError> {
        let mut out = OrderMap::new();
        for item in input.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            let Some((tag, level)) = item.split_once('=') else {
                return Err(TraceCtlError::Syntax(item.to_string()));
            };
            let level = LevelFilter::from_str(level.trim())
                .map_err(|_| TraceCtlError::Level(level.trim().to_string()))?;
            out.insert(tag.trim(), level);
        }
        Ok(out)
    }

    /// Apply a comma-separated list of `tag=level` items.
    ///
    /// `default=<level>` sets the default level and `all=<level>` sets every known target. Both
    /// are applied before the tag items so that `all=info,l2=debug` works as expected.
    ///
    /// # Errors
    ///
    /// Fails on bad syntax, a bad level or an unknown tag. Nothing is applied on syntax or level
    /// errors.
    pub fn setup_from_string(&self, input: &str) -> Result<(), TraceCtlError> {
        let config = Self::parse_config(input)?;
        if let Some(level) = config.get("default") {
            self.set_default_level(*level);
        }
        if let Some(level) = config.get("all") {
            self.set_level_all(*level);
        }
        for (tag, level) in config.iter().filter(|(t, _)| !matches!(**t, "default" | "all")) {
            self.set_tag_level(tag, *level)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn get_target(&self, target: &str) -> Option<TargetCfg> {
        self.db.lock().targets.get(target).cloned()
    }

    #[must_use]
    pub fn get_targets_by_tag(&self, tag: &str) -> Vec<TargetCfg> {
        let db = self.db.lock();
        db.tags
            .get(tag)
            .into_iter()
            .flatten()
            .filter_map(|t| db.targets.get(t).cloned())
            .collect()
    }

    /// Log every target with its level and tags.
    pub fn dump(&self) {
        let db = self.db.lock();
        info!("{db}");
    }

    #[must_use]
    pub fn as_config_string(&self) -> String {
        self.db.lock().as_config_string()
    }
}

static TRACING_CTL: OnceLock<TracingControl> = OnceLock::new();

/// Get the process-wide [`TracingControl`], initializing it on first use.
pub fn get_trace_ctl() -> &'static TracingControl {
    TRACING_CTL.get_or_init(TracingControl::new)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::custom_target;
    use pretty_assertions::assert_eq;
    use serial_test::serial;

    custom_target!("tctl-t1", LevelFilter::DEBUG, &["tctl-common"]);
    custom_target!("tctl-t2", LevelFilter::ERROR, &["tctl-common"]);
    custom_target!("tctl-t3", LevelFilter::WARN, &[]);

    #[test]
    #[serial]
    fn link_time_targets_are_registered() {
        let tctl = get_trace_ctl();
        assert!(tctl.get_target(module_path!()).is_some());
        assert!(tctl.get_target("tctl-t2").is_some());
        let mut tagged: Vec<_> = tctl
            .get_targets_by_tag("tctl-common")
            .iter()
            .map(TargetCfg::target)
            .collect();
        tagged.sort_unstable();
        assert_eq!(tagged, vec!["tctl-t1", "tctl-t2"]);
    }

    #[test]
    #[serial]
    fn setup_from_string_sets_tags() {
        let tctl = get_trace_ctl();
        tctl.setup_from_string("tctl-common=off, tctl-t3=trace").unwrap();
        for t in tctl.get_targets_by_tag("tctl-common") {
            assert_eq!(t.level(), LevelFilter::OFF);
        }
        assert_eq!(tctl.get_target("tctl-t3").unwrap().level(), LevelFilter::TRACE);
        assert!(tctl.as_config_string().contains("tctl-t3=trace"));
    }

    #[test]
    #[serial]
    fn setup_from_string_rejects_garbage() {
        let tctl = get_trace_ctl();
        assert_eq!(
            tctl.setup_from_string("tctl-t1=loud"),
            Err(TraceCtlError::Level("loud".to_string()))
        );
        assert_eq!(
            tctl.setup_from_string("tctl-t1=info,oops"),
            Err(TraceCtlError::Syntax("oops".to_string()))
        );
        assert_eq!(
            tctl.setup_from_string("no-such-tag=info"),
            Err(TraceCtlError::UnknownTag("no-such-tag".to_string()))
        );
    }
}
