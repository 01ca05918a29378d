//! Meta-analysis: means and confidence intervals over per-query metrics.

/// Mean with a 95% confidence half-width (normal approximation,
/// `1.96 * stderr`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub mean: f64,
    pub ci_half_width: f64,
}

impl Summary {
    pub fn from_values(values: &[f64]) -> Self {
        let n = values.len();
        if n == 0 {
            return Self {
                mean: 0.0,
                ci_half_width: 0.0,
            };
        }
        let mean = values.iter().sum::<f64>() / n as f64;
        if n < 2 {
            return Self {
                mean,
                ci_half_width: 0.0,
            };
        }
        let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / (n as f64 - 1.0);
        let stderr = (var / n as f64).sqrt();
        Self {
            mean,
            ci_half_width: 1.96 * stderr,
        }
    }

    pub fn lower(&self) -> f64 {
        self.mean - self.ci_half_width
    }

    pub fn upper(&self) -> f64 {
        self.mean + self.ci_half_width
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4} +/- {:.4}", self.mean, self.ci_half_width)
    }
}

/// Accumulates per-query vectors and per-index scalars for a final
/// report.
#[derive(Debug, Default)]
pub struct MetaAnalysis {
    recall: Vec<f64>,
    precision: Vec<f64>,
    query_time_us: Vec<f64>,
    dist_comps: Vec<f64>,
    impr_efficiency: Vec<f64>,
    impr_dist_comps: Vec<f64>,
    index_memory_bytes: f64,
    index_time_ms: f64,
}

impl MetaAnalysis {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one query. `brute_time_us`/`brute_dist_comps` are the
    /// baseline averages the improvements divide by.
    pub fn add_query(
        &mut self,
        recall: f64,
        precision: f64,
        time_us: f64,
        dist_comps: f64,
        brute_time_us: f64,
        brute_dist_comps: f64,
    ) {
        self.recall.push(recall);
        self.precision.push(precision);
        self.query_time_us.push(time_us);
        self.dist_comps.push(dist_comps);
        self.impr_efficiency
            .push(if time_us > 0.0 { brute_time_us / time_us } else { 0.0 });
        self.impr_dist_comps.push(if dist_comps > 0.0 {
            brute_dist_comps / dist_comps
        } else {
            0.0
        });
    }

    pub fn set_index_stats(&mut self, memory_bytes: f64, build_time_ms: f64) {
        self.index_memory_bytes = memory_bytes;
        self.index_time_ms = build_time_ms;
    }

    pub fn recall(&self) -> Summary {
        Summary::from_values(&self.recall)
    }

    pub fn precision(&self) -> Summary {
        Summary::from_values(&self.precision)
    }

    pub fn query_time_us(&self) -> Summary {
        Summary::from_values(&self.query_time_us)
    }

    /// Aggregate throughput over the measured wall time.
    pub fn queries_per_sec(&self) -> f64 {
        let total_us: f64 = self.query_time_us.iter().sum();
        if total_us > 0.0 {
            self.query_time_us.len() as f64 / (total_us / 1e6)
        } else {
            0.0
        }
    }

    pub fn dist_comps(&self) -> Summary {
        Summary::from_values(&self.dist_comps)
    }

    pub fn impr_efficiency(&self) -> Summary {
        Summary::from_values(&self.impr_efficiency)
    }

    pub fn impr_dist_comps(&self) -> Summary {
        Summary::from_values(&self.impr_dist_comps)
    }

    pub fn index_memory_bytes(&self) -> f64 {
        self.index_memory_bytes
    }

    pub fn index_time_ms(&self) -> f64 {
        self.index_time_ms
    }

    /// Multi-line human-readable report.
    pub fn report(&self) -> String {
        format!(
            "recall:            {}\n\
             precision:         {}\n\
             query time (us):   {}\n\
             queries/sec:       {:.1}\n\
             dist comps:        {}\n\
             impr. efficiency:  {}\n\
             impr. dist comps:  {}\n\
             index memory (MB): {:.2}\n\
             index time (ms):   {:.1}",
            self.recall(),
            self.precision(),
            self.query_time_us(),
            self.queries_per_sec(),
            self.dist_comps(),
            self.impr_efficiency(),
            self.impr_dist_comps(),
            self.index_memory_bytes / 1e6,
            self.index_time_ms,
        )
    }
}
