use std::thread;
use std::time::Duration;

use crate::client::{HTTPClient, PollError};
use crate::models::{PollConfig, PredictionRequest, Submission, TaskInfo};
use crate::render;

/// Anything that can report the current state of a task.
pub trait TaskSource {
    fn fetch(&self, id: &str) -> Result<TaskInfo, PollError>;
}

impl TaskSource for HTTPClient {
    fn fetch(&self, id: &str) -> Result<TaskInfo, PollError> {
        self.poll(id)
    }
}

/// Submit once, then poll until the task is terminal or the poll budget runs out.
pub fn run(cfg: &PollConfig, client: &HTTPClient) -> Result<TaskInfo, String> {
    let mut req = PredictionRequest {
        prompt: cfg.prompt.clone(),
        ..PredictionRequest::default()
    };
    if let Some(path) = &cfg.image {
        let (data, media_type) = crate::client::load_image(path)?;
        req.image = Some(data);
        req.image_type = Some(media_type);
    }

    let accepted = match client.submit(&req)? {
        Submission::Finished(task) => return Ok(task),
        Submission::Queued(accepted) => accepted,
    };
    render::accepted(&accepted);
    wait_for(client, &accepted.id, cfg.interval, cfg.max_polls)
}

/// Sleeps `interval` before every poll. Retryable failures use up a poll and
/// go on; any other failure ends the wait.
pub fn wait_for(source: &impl TaskSource, id: &str, interval: Duration, max_polls: u32) -> Result<TaskInfo, String> {
    for attempt in 1..=max_polls {
        thread::sleep(interval);
        match source.fetch(id) {
            Ok(task) if task.is_terminal() => return Ok(task),
            Ok(task) => render::progress(attempt, max_polls, &task),
            Err(err) if err.retryable => render::retry(attempt, &err.message),
            Err(err) => return Err(err.message),
        }
    }
    Err(format!("task {} still running after {} polls", id, max_polls))
}
