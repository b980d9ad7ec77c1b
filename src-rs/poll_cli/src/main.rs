mod cli;
mod client;
mod models;
mod poller;
mod render;

use std::process::ExitCode;

use client::HTTPClient;

fn main() -> ExitCode {
    let config = match cli::parse_config() {
        Ok(config) => config,
        Err(msg) => {
            render::error(&msg);
            return ExitCode::from(2);
        }
    };
    let client = match HTTPClient::new(&config.base_url, config.token.clone()) {
        Ok(client) => client,
        Err(msg) => {
            render::error(&msg);
            return ExitCode::FAILURE;
        }
    };

    render::banner(&config);
    match poller::run(&config, &client) {
        Ok(task) => {
            render::finished(&task);
            if task.status == "completed" {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(msg) => {
            render::error(&msg);
            ExitCode::FAILURE
        }
    }
}
