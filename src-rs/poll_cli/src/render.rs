use crate::models::{Accepted, PollConfig, TaskInfo};

pub fn banner(cfg: &PollConfig) {
    println!("imagegen poll client");
    println!("API: {}", cfg.base_url);
    println!(
        "Prompt: {}",
        cfg.prompt.as_deref().unwrap_or("(server default)")
    );
}

pub fn accepted(resp: &Accepted) {
    println!("task {} {}", resp.id, resp.status);
    if let Some(message) = &resp.message {
        println!("  {}", message);
    }
    if let Some(url) = &resp.poll_url {
        println!("  poll: {}", url);
    }
}

pub fn progress(attempt: u32, max: u32, task: &TaskInfo) {
    match &task.partial_image_url {
        Some(url) => println!("[{}/{}] {} (preview: {})", attempt, max, task.status, url),
        None => println!("[{}/{}] {}", attempt, max, task.status),
    }
    if let Some(err) = &task.error_message {
        println!("  chunk error: {}", err);
    }
}

pub fn finished(task: &TaskInfo) {
    println!("task {} {}", task.id, task.status);
    if let Some(prompt) = &task.prompt {
        println!("prompt: {}", prompt);
    }
    if let Some(reason) = &task.finish_reason {
        println!("finish reason: {}", reason);
    }
    if let Some(url) = &task.image_url {
        println!("image: {}", url);
    }
    if let Some(params) = &task.params {
        println!("params: {}", params);
    }
    if let Some(err) = &task.error {
        println!("error: {}", err);
    }
    if task.image_url.is_none() {
        if let Some(content) = &task.content {
            println!("content:\n{}", content);
        }
    }
}

pub fn retry(attempt: u32, msg: &str) {
    eprintln!("poll {} failed, retrying: {}", attempt, msg);
}

pub fn error(msg: &str) {
    eprintln!("error: {}", msg);
}
