use eyre::Context;
use std::io::IsTerminal;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use wayback_tube::config::Settings;
use wayback_tube::fetcher::SearchOptions;
use wayback_tube::video::VideoRecord;
use wayback_tube::{Wayback, parse_reference_date};

const USAGE: &str = "\
usage: wayback-cli <command>

  keys list
  keys add <api-key>
  keys remove <api-key>
  keys reset
  channel <channel-id> <date>
  channels <date> <channel-id...>
  search <date> <query...>
  recommend <channel-id> <date> <title...>
  cache clear [prefix]
  cache purge

<date> is YYYY-MM-DD or an RFC 3339 timestamp.";

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    let settings = Settings::load().await.context("load settings")?;
    let wayback = Wayback::open(settings)?;

    match args.as_slice() {
        ["keys", "list"] => {
            let pool = wayback.pool().lock().await;
            if pool.is_empty() {
                eprintln!("no API keys configured");
            }
            for status in pool.statuses() {
                let marker = if status.is_current { "*" } else { " " };
                let state = match (status.quota_exceeded, status.failed) {
                    (true, _) => "quota exceeded",
                    (false, true) => "failed",
                    (false, false) => "ok",
                };
                let rate = status
                    .success_rate
                    .map(|r| format!("{:.0}%", r * 100.0))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{marker} {:<8} {:<15} {:>6} requests  {:>5} success",
                    status.masked_token, state, status.request_count, rate
                );
            }
        }
        ["keys", "add", key] => {
            if wayback.pool().lock().await.add(key) {
                eprintln!("added key");
            } else {
                eyre::bail!("key rejected: too short or already present");
            }
        }
        ["keys", "remove", key] => {
            if !wayback.pool().lock().await.remove(key) {
                eyre::bail!("no such key");
            }
            eprintln!("removed key");
        }
        ["keys", "reset"] => {
            wayback.pool().lock().await.reset_health();
            eprintln!("cleared failure and quota flags on all keys");
        }
        ["channel", channel_id, date] => {
            let reference = parse_reference_date(date)?;
            let videos = wayback
                .fetcher()
                .channel_videos(channel_id, reference, false)
                .await;
            print_videos(&videos);
        }
        ["channels", date, channel_ids @ ..] if !channel_ids.is_empty() => {
            let reference = parse_reference_date(date)?;
            let channel_ids: Vec<String> = channel_ids.iter().map(|id| id.to_string()).collect();
            let videos = wayback
                .fetcher()
                .channels_videos(&channel_ids, reference)
                .await;
            print_videos(&videos);
        }
        ["search", date, query @ ..] if !query.is_empty() => {
            let reference = parse_reference_date(date)?;
            let videos = wayback
                .fetcher()
                .search(&query.join(" "), reference, &SearchOptions::default(), false)
                .await;
            print_videos(&videos);
        }
        ["recommend", channel_id, date, title @ ..] if !title.is_empty() => {
            let reference = parse_reference_date(date)?;
            let videos = wayback
                .recommend(channel_id, &title.join(" "), reference)
                .await;
            print_videos(&videos);
        }
        ["cache", "clear"] => {
            let removed = wayback.clear_cache(None)?;
            eprintln!("removed {removed} cached entries");
        }
        ["cache", "clear", prefix] => {
            let removed = wayback.clear_cache(Some(*prefix))?;
            eprintln!("removed {removed} cached entries");
        }
        ["cache", "purge"] => {
            let removed = wayback.purge_expired_cache()?;
            eprintln!("removed {removed} expired entries");
        }
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    }

    Ok(())
}

fn print_videos(videos: &[VideoRecord]) {
    if videos.is_empty() {
        eprintln!("no videos");
        return;
    }
    for video in videos {
        let viral = if video.is_viral { " [viral]" } else { "" };
        println!("{}  {}{viral}", video.id, video.title);
        println!(
            "    {} · {} · {}",
            video.channel_name, video.view_count_display, video.relative_date_display
        );
    }
}
