//! `scanlate status` - show the state of a translation job.

use crate::config::Settings;
use crate::db;
use crate::jobs::{JobStore, SqliteJobStore};

pub async fn run(settings: &Settings, task_id: &str) -> anyhow::Result<()> {
    let pool = db::open(&settings.database.path)?;
    let store = SqliteJobStore::new(pool)?;

    match store.get(task_id).await? {
        Some(job) => {
            println!("Job {task_id}");
            println!("  status:   {}", job.status.as_str());
            println!("  progress: {}%", job.progress);
            println!("  chapter:  {}", job.chapter_url);
            println!("  target:   {} ({})", job.target_lang, job.mode);
            if let Some(error) = job.error {
                println!("  error:    {error}");
            }
            println!("  updated:  {}", job.updated_at.to_rfc3339());
        }
        None => println!("No job with id {task_id}"),
    }

    Ok(())
}
