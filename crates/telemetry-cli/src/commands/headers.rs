use reqwest::{Method, Request};

use super::CliResult;

pub fn run(url: &str) -> CliResult {
    let scheduler = super::open_scheduler(None)?;
    let request = Request::new(Method::GET, url::Url::parse(url)?);
    let request = scheduler.apply_headers(request)?;

    if request.headers().is_empty() {
        println!("no custom headers for {url}");
    }
    for (name, value) in request.headers() {
        println!("{name}: {}", value.to_str().unwrap_or("<binary>"));
    }
    Ok(())
}
