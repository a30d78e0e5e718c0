//! Run plans: map a run mode onto concrete [`SplitJob`]s.
//!
//! Two layouts are produced under an output root:
//!
//! ```text
//! dev/test run                     sharded run
//! out/                             out/
//! ├── dev.jsonl                    ├── train_shard-00001.jsonl
//! ├── test.jsonl                   ├── train_shard-00002.jsonl
//! └── images/                      └── images/train/
//!     ├── dev/PMC…/                    ├── shard-00001/PMC…/
//!     └── test/PMC…/                   └── shard-00002/PMC…/
//! ```

use crate::error::HarvestError;
use crate::harvest::{HarvestStats, Harvester, SplitJob};
use std::path::Path;
use tracing::info;

/// An ordered list of jobs sharing one output root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
    pub jobs: Vec<SplitJob>,
}

impl RunPlan {
    /// Paired run: the dev list, then the test list.
    pub fn dev_test(dev_list: &Path, test_list: &Path, out_root: &Path) -> Self {
        let images = out_root.join("images");
        Self {
            jobs: vec![
                SplitJob::new(dev_list, out_root.join("dev.jsonl"), images.join("dev")),
                SplitJob::new(test_list, out_root.join("test.jsonl"), images.join("test")),
            ],
        }
    }

    /// One job per `*.txt` manifest in `shard_dir`, in file-name order,
    /// numbered from 1.
    pub fn shards(shard_dir: &Path, out_root: &Path) -> Result<Self, HarvestError> {
        if !shard_dir.is_dir() {
            return Err(HarvestError::ManifestNotFound {
                path: shard_dir.to_path_buf(),
            });
        }
        let read_err = |source| HarvestError::ManifestRead {
            path: shard_dir.to_path_buf(),
            source,
        };

        let mut lists = Vec::new();
        for entry in std::fs::read_dir(shard_dir).map_err(read_err)? {
            let path = entry.map_err(read_err)?.path();
            if path.is_file() && path.extension().is_some_and(|e| e == "txt") {
                lists.push(path);
            }
        }
        if lists.is_empty() {
            return Err(HarvestError::NoShards {
                path: shard_dir.to_path_buf(),
            });
        }
        lists.sort();

        let images = out_root.join("images").join("train");
        let jobs = lists
            .into_iter()
            .enumerate()
            .map(|(i, list)| {
                let n = i + 1;
                SplitJob::new(
                    list,
                    out_root.join(format!("train_shard-{n:05}.jsonl")),
                    images.join(format!("shard-{n:05}")),
                )
            })
            .collect();
        Ok(Self { jobs })
    }
}

impl Harvester {
    /// Run every job of `plan` in order, stopping at the first fatal error.
    pub async fn run_plan(&self, plan: &RunPlan) -> Result<Vec<HarvestStats>, HarvestError> {
        let mut all = Vec::with_capacity(plan.jobs.len());
        for (i, job) in plan.jobs.iter().enumerate() {
            info!("Job {}/{}: {}", i + 1, plan.jobs.len(), job.manifest.display());
            all.push(self.harvest(job).await?);
        }
        Ok(all)
    }
}
