use std::time::Duration;

/// Settings consumed by the monitoring manager
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Reclaim non-zero RMID associations found at startup instead of
    /// quarantining the cores that carry them.
    pub free_in_use_rmid: bool,
}

/// Settings for the periodic sampling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerConfig {
    /// Nominal time between two polls
    pub interval: Duration,
    /// Total monitoring time, `None` runs until cancelled
    pub duration: Option<Duration>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            duration: None,
        }
    }
}

/// Highest CPU id the kernel can number (`CONFIG_NR_CPUS` tops out at 8192)
pub const MAX_CPU_ID: u32 = 8191;

/// Parse CPU list like "0-3,8-11" into a sorted, deduplicated `Vec<u32>`
///
/// Returns `None` on any malformed element, reversed range or id above
/// [`MAX_CPU_ID`].
pub fn parse_cpu_list(s: &str) -> Option<Vec<u32>> {
    let mut cpus = Vec::new();
    for part in s.trim().split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((start, end)) = part.split_once('-') {
            let start: u32 = start.trim().parse().ok()?;
            let end: u32 = end.trim().parse().ok()?;
            if end < start || end > MAX_CPU_ID {
                return None;
            }
            cpus.extend(start..=end);
        } else {
            let cpu: u32 = part.parse().ok()?;
            if cpu > MAX_CPU_ID {
                return None;
            }
            cpus.push(cpu);
        }
    }
    cpus.sort_unstable();
    cpus.dedup();
    Some(cpus)
}

/// Cores and optional label of one `--group` argument, `[label:]cpu-list`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRequest {
    pub cores: Vec<u32>,
    pub label: Option<String>,
}

pub fn parse_group_arg(s: &str) -> Option<GroupRequest> {
    let (label, list) = match s.split_once(':') {
        Some((label, list)) if !label.trim().is_empty() => (Some(label.trim().to_string()), list),
        Some(_) => return None,
        None => (None, s),
    };
    let cores = parse_cpu_list(list)?;
    if cores.is_empty() {
        return None;
    }
    Some(GroupRequest { cores, label })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_list() {
        assert_eq!(parse_cpu_list("0-3,8-9\n"), Some(vec![0, 1, 2, 3, 8, 9]));
        assert_eq!(parse_cpu_list("5"), Some(vec![5]));
        assert_eq!(parse_cpu_list("2,1,2"), Some(vec![1, 2]));
        assert_eq!(parse_cpu_list("3-1"), None);
        assert_eq!(parse_cpu_list("a"), None);
    }

    #[test]
    fn test_parse_cpu_list_rejects_huge_ids() {
        assert_eq!(parse_cpu_list("0-4294967295"), None);
        assert_eq!(parse_cpu_list("8192"), None);
        assert_eq!(parse_cpu_list("0,9000-9001"), None);
        assert_eq!(parse_cpu_list("8190-8191"), Some(vec![8190, 8191]));
        assert_eq!(parse_group_arg("db:0-100000"), None);
    }

    #[test]
    fn test_sampler_defaults() {
        let cfg = SamplerConfig::default();
        assert_eq!(cfg.interval, Duration::from_secs(1));
        assert!(cfg.duration.is_none());
        assert!(!MonitorConfig::default().free_in_use_rmid);
    }

    #[test]
    fn test_parse_group_arg() {
        assert_eq!(
            parse_group_arg("db:0-1,4"),
            Some(GroupRequest {
                cores: vec![0, 1, 4],
                label: Some("db".to_string()),
            })
        );
        assert_eq!(parse_group_arg("3").map(|g| g.label), Some(None));
        assert_eq!(parse_group_arg(":3"), None);
        assert_eq!(parse_group_arg("web:"), None);
        assert_eq!(parse_group_arg("web:x"), None);
    }
}
