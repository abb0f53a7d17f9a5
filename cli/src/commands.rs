//! Engine setup and subcommand handlers.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use ratechain_common::{parse_date, Currency, Money};
use ratechain_fx::{
    ConversionQuery, DelimitedFeedParser, FileFeedFetcher, FileResourceCache, FxConfig, FxEngine,
    FxError, ResourceCache,
};
use serde_json::json;
use tracing::warn;

/// A `--feed NAME=LOCATION` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedArg {
    pub name: String,
    pub location: String,
}

pub fn parse_feed(s: &str) -> Result<FeedArg, String> {
    let (name, location) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=PATH, got `{}`", s))?;
    let (name, location) = (name.trim(), location.trim());
    if name.is_empty() || location.is_empty() {
        return Err(format!("expected NAME=PATH, got `{}`", s));
    }
    Ok(FeedArg {
        name: name.to_string(),
        location: location.to_string(),
    })
}

/// Configuration with only the providers named by `feeds`, pointed at the
/// given locations.
pub fn build_config(feeds: &[FeedArg], chain: Option<&str>, timeout_ms: u64) -> anyhow::Result<FxConfig> {
    let mut config = FxConfig::from_env();
    config.first_load_timeout = Duration::from_millis(timeout_ms);
    if let Some(chain) = chain {
        config.default_chain = Some(chain.to_string());
    }

    let mut bucket_feeds = Vec::new();
    let mut basket_feeds = Vec::new();

    for feed in feeds {
        if let Some(bucket) = config.bucket_feeds.iter().find(|f| f.name == feed.name) {
            let mut bucket = bucket.clone();
            bucket.url = feed.location.clone();
            // Local files do not change under a running command.
            bucket.refresh_interval = None;
            bucket_feeds.push(bucket);
        } else if let Some(basket) = config.basket_feeds.iter().find(|f| f.name == feed.name) {
            let mut basket = basket.clone();
            if basket.has_history() {
                let (from, to) = feed.location.split_once(',').ok_or_else(|| {
                    anyhow!("{} takes FROM_TEMPLATE,TO_TEMPLATE", feed.name)
                })?;
                basket.history_from_pivot_url = Some(from.trim().to_string());
                basket.history_to_pivot_url = Some(to.trim().to_string());
            } else {
                basket.current_url = Some(feed.location.clone());
            }
            basket.refresh_interval = None;
            basket_feeds.push(basket);
        } else {
            let known: Vec<&str> = config
                .bucket_feeds
                .iter()
                .map(|f| f.name.as_str())
                .chain(config.basket_feeds.iter().map(|f| f.name.as_str()))
                .collect();
            bail!("unknown provider `{}`, expected one of {}", feed.name, known.join(", "));
        }
    }

    config.bucket_feeds = bucket_feeds;
    config.basket_feeds = basket_feeds;
    config.validate().map_err(|e| anyhow!(e))?;
    Ok(config)
}

pub fn build_engine(config: FxConfig, delimiter: char, cache_dir: Option<&Path>) -> anyhow::Result<FxEngine> {
    let cache: Option<Arc<dyn ResourceCache>> = match cache_dir {
        Some(dir) => Some(Arc::new(
            FileResourceCache::new(dir)
                .with_context(|| format!("cannot open cache directory {}", dir.display()))?,
        )),
        None => None,
    };

    let engine = FxEngine::from_config(
        config,
        Arc::new(FileFeedFetcher::new()),
        Arc::new(DelimitedFeedParser::new(delimiter)),
        cache,
    )?;
    Ok(engine)
}

/// One-line error report; engine errors carry their stable code.
pub fn describe_error(err: &anyhow::Error) -> String {
    match err.downcast_ref::<FxError>() {
        Some(fx) => format!("error[{}]: {}", fx.error_code(), fx),
        None => format!("error: {:#}", err),
    }
}

fn query(base: &str, term: &str, date: Option<&str>, providers: Vec<String>) -> anyhow::Result<ConversionQuery> {
    let mut query = ConversionQuery::new(Currency::new(base), Currency::new(term)).with_providers(providers);
    if let Some(date) = date {
        query = query.on(parse_date(date)?);
    }
    Ok(query)
}

pub async fn rate(
    engine: &FxEngine,
    base: &str,
    term: &str,
    date: Option<&str>,
    providers: Vec<String>,
    json: bool,
) -> anyhow::Result<()> {
    let query = query(base, term, date, providers)?;
    let rate = engine.exchange_rate_for(&query).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&rate)?);
    } else {
        println!("{}", rate);
        for link in &rate.chain {
            println!("  via {}", link);
        }
    }
    Ok(())
}

#[derive(Debug)]
pub struct ConvertRequest {
    pub amount: String,
    pub from: String,
    pub to: String,
    pub date: Option<String>,
    pub providers: Vec<String>,
    pub round: bool,
}

pub async fn convert(engine: &FxEngine, request: ConvertRequest, json: bool) -> anyhow::Result<()> {
    let amount = Money::from_str(&request.amount, Currency::new(&request.from))
        .with_context(|| format!("invalid amount `{}`", request.amount))?;
    let template = query(&request.to, &request.to, request.date.as_deref(), request.providers)?;

    let mut conversion = engine
        .currency_conversion_for(template)?
        .convert(&amount)
        .await?;
    if request.round {
        conversion.output = conversion.output.round();
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&conversion)?);
    } else {
        println!("{} = {}", conversion.input, conversion.output);
        println!("  at {}", conversion.rate);
    }
    Ok(())
}

pub async fn providers(engine: &FxEngine, json: bool) -> anyhow::Result<()> {
    for (name, error) in engine.await_ready().await {
        warn!(provider = %name, error = %error, "Provider not ready");
    }

    let chain = engine.default_provider_chain();
    let names = engine.provider_names();

    if json {
        let entries: Vec<_> = names
            .iter()
            .map(|name| {
                let state = engine.load_state(name);
                json!({
                    "name": name,
                    "in_default_chain": chain.contains(name),
                    "status": format!("{:?}", state.status),
                    "diagnostic": state.diagnostic,
                    "attempts": state.attempts,
                    "last_success": state.last_success,
                })
            })
            .collect();
        let out = json!({ "providers": entries, "default_chain": chain });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("default chain: {}", chain.join(","));
        for name in &names {
            let state = engine.load_state(name);
            let status = format!("{:?}", state.status);
            println!("{:<12} {:<12} {}", name, status, state.diagnostic);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_parse_feed() {
        let feed = parse_feed("ECB = /data/ecb.csv").unwrap();
        assert_eq!(feed.name, "ECB");
        assert_eq!(feed.location, "/data/ecb.csv");

        assert!(parse_feed("ECB").is_err());
        assert!(parse_feed("=x").is_err());
    }

    #[test]
    fn test_build_config_keeps_named_feeds() {
        let feeds = vec![
            parse_feed("ECB=/data/ecb.csv").unwrap(),
            parse_feed("IMF-HIST=/data/{period}-from.csv,/data/{period}-to.csv").unwrap(),
        ];
        let config = build_config(&feeds, Some("ECB,IMF-HIST"), 250).unwrap();

        assert_eq!(config.bucket_feeds.len(), 1);
        assert_eq!(config.bucket_feeds[0].url, "/data/ecb.csv");
        assert!(config.bucket_feeds[0].refresh_interval.is_none());
        assert_eq!(config.basket_feeds.len(), 1);
        assert_eq!(
            config.basket_feeds[0].history_to_pivot_url.as_deref(),
            Some("/data/{period}-to.csv")
        );
        assert_eq!(config.first_load_timeout, Duration::from_millis(250));
        assert_eq!(config.default_chain.as_deref(), Some("ECB,IMF-HIST"));
    }

    #[test]
    fn test_build_config_rejects_bad_feeds() {
        let unknown = vec![parse_feed("BOE=/data/boe.csv").unwrap()];
        assert!(build_config(&unknown, None, 100).is_err());

        let history_without_templates = vec![parse_feed("IMF-HIST=/data/one.csv").unwrap()];
        assert!(build_config(&history_without_templates, None, 100).is_err());

        let twice = vec![
            parse_feed("ECB=/a.csv").unwrap(),
            parse_feed("ECB=/b.csv").unwrap(),
        ];
        assert!(build_config(&twice, None, 100).is_err());
    }

    #[test]
    fn test_describe_error() {
        let err = anyhow::Error::from(FxError::UnsupportedProvider("BOE".to_string()));
        assert_eq!(
            describe_error(&err),
            "error[UNSUPPORTED_PROVIDER]: Unsupported rate provider: BOE"
        );

        let err = anyhow!("unknown provider `BOE`");
        assert_eq!(describe_error(&err), "error: unknown provider `BOE`");
    }

    #[tokio::test]
    async fn test_engine_over_local_file() {
        let dir = std::env::temp_dir().join(format!("ratechain-cli-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("ecb.csv");
        std::fs::write(&path, "date,base,term,factor\n2024-01-02,EUR,USD,1.10\n").unwrap();

        let feeds = vec![FeedArg {
            name: "ECB".to_string(),
            location: path.display().to_string(),
        }];
        let config = build_config(&feeds, Some("IDENT,ECB"), 2000).unwrap();
        let engine = build_engine(config, ',', None).unwrap();

        let q = query("USD", "EUR", Some("2024-01-02"), Vec::new()).unwrap();
        let rate = engine.exchange_rate_for(&q).await.unwrap();
        assert_eq!(rate.factor.round_dp(4), Decimal::new(9091, 4));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
