/// 主机指标采样器
///
/// Linux 上读取 `/proc/stat`，CPU 使用率由相邻两次采样的差值计算，
/// 因此首次采样返回 0；其他平台恒为 0。
#[derive(Debug, Default)]
pub struct HostSampler {
    last: Option<CpuTimes>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CpuTimes {
    busy: u64,
    total: u64,
}

impl CpuTimes {
    fn parse(stat: &str) -> Option<Self> {
        let line = stat.lines().find(|line| line.starts_with("cpu "))?;
        let fields: Vec<u64> = line
            .split_whitespace()
            .skip(1)
            .filter_map(|value| value.parse().ok())
            .collect();
        if fields.len() < 4 {
            return None;
        }

        let total: u64 = fields.iter().sum();
        // idle + iowait
        let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
        Some(Self {
            busy: total.saturating_sub(idle),
            total,
        })
    }

    #[cfg(target_os = "linux")]
    fn read() -> Option<Self> {
        std::fs::read_to_string("/proc/stat")
            .ok()
            .and_then(|stat| Self::parse(&stat))
    }

    #[cfg(not(target_os = "linux"))]
    fn read() -> Option<Self> {
        None
    }
}

impl HostSampler {
    pub fn new() -> Self {
        Self {
            last: CpuTimes::read(),
        }
    }

    pub fn cpu_percent(&mut self) -> f64 {
        let Some(now) = CpuTimes::read() else {
            return 0.0;
        };
        let percent = match self.last {
            Some(prev) if now.total > prev.total => {
                let busy = now.busy.saturating_sub(prev.busy) as f64;
                (busy / (now.total - prev.total) as f64 * 100.0).clamp(0.0, 100.0)
            }
            _ => 0.0,
        };
        self.last = Some(now);
        percent
    }
}

pub fn hostname() -> Option<String> {
    ::hostname::get().ok().and_then(|name| name.into_string().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_proc_stat() {
        let stat = "cpu  100 0 50 800 50 0 0 0 0 0\ncpu0 50 0 25 400 25 0 0 0 0 0\n";
        let times = CpuTimes::parse(stat).unwrap();
        assert_eq!(times.total, 1000);
        assert_eq!(times.busy, 150);

        assert!(CpuTimes::parse("intr 1 2 3").is_none());
    }

    #[test]
    fn test_cpu_percent_is_a_percentage() {
        let mut sampler = HostSampler::new();
        let cpu = sampler.cpu_percent();
        assert!((0.0..=100.0).contains(&cpu));
    }
}
