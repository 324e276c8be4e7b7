use std::collections::{HashMap, HashSet};
use std::fmt::Write;
use std::time::{Duration, Instant};

use petgraph::graph::NodeIndex;

use crate::graph::TaskGraph;

#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub start: Instant,
    pub duration: Duration,
}

/// Timings collected while dispatching.
#[derive(Debug, Default)]
pub struct Diagnostics {
    /// Every dispatched action, real or restored.
    pub execution_times: HashMap<NodeIndex, TaskExecution>,
    /// Tasks restored through their setscene variant.
    pub restored: HashSet<NodeIndex>,
}

impl Diagnostics {
    /// Renders the task graph as a Mermaid diagram.
    ///
    /// * **Green** to **red**: real executions, by duration
    /// * **Blue**: restored from the cache
    /// * **Grey**: never dispatched
    pub fn render_mermaid(&self, graph: &TaskGraph) -> String {
        let mut f = String::new();
        _ = writeln!(f, "graph LR");

        let real = self
            .execution_times
            .iter()
            .filter(|(ix, _)| !self.restored.contains(ix))
            .map(|(_, t)| t.duration.as_secs_f64());

        let (mut min_time, mut max_time) = real.fold((f64::MAX, f64::MIN), |(lo, hi), secs| {
            (lo.min(secs), hi.max(secs))
        });

        if min_time > max_time {
            min_time = 0.0;
            max_time = 0.0;
        }
        if (max_time - min_time).abs() < f64::EPSILON {
            max_time = min_time + 1.0;
        }

        for ix in graph.indices() {
            let name = graph.node(ix).id.to_string().replace('"', "\\\"");

            let (label, color) = match self.execution_times.get(&ix) {
                Some(exec) if self.restored.contains(&ix) => {
                    (format!("setscene {:.2?}", exec.duration), "#ADD8E6".to_string())
                }
                Some(exec) => {
                    let t = (exec.duration.as_secs_f64() - min_time) / (max_time - min_time);
                    (format!("{:.2?}", exec.duration), gradient(t))
                }
                None => ("not run".to_string(), "#D3D3D3".to_string()),
            };

            _ = writeln!(f, "    {}[\"{}\\n{}\"]", ix.index(), name, label);
            _ = writeln!(f, "    style {} fill:{}", ix.index(), color);
        }

        for ix in graph.indices() {
            for dep in graph.dependencies(ix) {
                _ = writeln!(f, "    {} --> {}", dep.index(), ix.index());
            }
        }

        f
    }
}

/// Green at 0.0, yellow at 0.5, red at 1.0.
fn gradient(t: f64) -> String {
    let (r, g) = if t < 0.5 {
        ((255.0 * t * 2.0) as u8, 255)
    } else {
        (255, (255.0 * (1.0 - (t - 0.5) * 2.0)) as u8)
    };
    format!("#{r:02X}{g:02X}00")
}
