use crate::cli::{HttpFilterArgs, HttpSnapshotArgs};
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::fetch::{ApiClient, FilterParam, SnapshotParam};
use crate::utils::time::parse_datetime_param;

/// Calls the filter endpoint once and prints the raw response body.
pub async fn filter(args: &HttpFilterArgs) -> Result<()> {
    let minute = parse_datetime_param(&args.minute)
        .map_err(|err| AppError::message(format!("--minute: {}", err)))?;
    let config = Config::load()?;
    let client = ApiClient::new(&config.apikey)?;

    let body = client
        .filter_raw(&FilterParam {
            exchange: args.exchange.clone(),
            channels: split_channels(&args.channels),
            minute: minute.timestamp().div_euclid(60),
            format: args.format.clone(),
        })
        .await?;
    print!("{}", body);
    Ok(())
}

/// Calls the snapshot endpoint once and prints the raw response body.
pub async fn snapshot(args: &HttpSnapshotArgs) -> Result<()> {
    let at = parse_datetime_param(&args.at)
        .map_err(|err| AppError::message(format!("--at: {}", err)))?;
    let config = Config::load()?;
    let client = ApiClient::new(&config.apikey)?;

    let body = client
        .snapshot_raw(&SnapshotParam {
            exchange: args.exchange.clone(),
            channels: split_channels(&args.channels),
            at,
            format: args.format.clone(),
        })
        .await?;
    print!("{}", body);
    Ok(())
}

fn split_channels(list: &str) -> Vec<String> {
    list.split(',')
        .filter(|channel| !channel.is_empty())
        .map(|channel| channel.to_string())
        .collect()
}
