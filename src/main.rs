use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::{ChatKind, Me};
use teloxide::utils::command::BotCommands;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use newsbrief::assistant::{ConversationStore, Engine, Inbound, Reply, TelegramClient, digest};
use newsbrief::clock::{Clock, SystemClock};
use newsbrief::config::{Config, ProxyConfig};
use newsbrief::llm::{self, ChatModel};
use newsbrief::market::{Analyst, MarketData};
use newsbrief::news::{
    BriefRenderer, CatalogCache, Fetcher, GNewsClient, LlmUnderstanding, NewsApiClient, NewsDesk, NewsProvider,
    SourceResolver, TextUnderstanding, Understanding, WindowLimits,
};
use newsbrief::telegram_log;

const ANALYZING: &str = "📡 Analyzing…";

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Commands:")]
enum Command {
    #[command(description = "check the bot is alive")]
    Ping,
    #[command(description = "market analysis with trade ideas")]
    Advise,
    #[command(description = "check the news provider")]
    NewsHealth,
    #[command(description = "edit the last image")]
    Edit(String),
    #[command(description = "speak a reply")]
    Voice(String),
    #[command(description = "Telegram connectivity check")]
    NetDiag,
    #[command(description = "forget our conversation")]
    Reset,
}

struct BotState {
    engine: Arc<Engine>,
    telegram: Arc<TelegramClient>,
    proxy: ProxyConfig,
}

fn apply_proxy(mut builder: reqwest::ClientBuilder, proxy: &ProxyConfig) -> Result<reqwest::ClientBuilder, reqwest::Error> {
    if let Some(ref url) = proxy.http {
        builder = builder.proxy(reqwest::Proxy::http(url)?);
    }
    if let Some(ref url) = proxy.https {
        builder = builder.proxy(reqwest::Proxy::https(url)?);
    }
    Ok(builder)
}

fn build_engine(config: &Config, http: reqwest::Client, clock: Arc<dyn Clock>) -> Engine {
    let openai = llm::Client::new(config.openai_api_key.clone(), http.clone()).with_base_url(&config.news.openai_base_url);
    let chat: Arc<dyn ChatModel> = Arc::new(openai.clone());

    let provider: Arc<dyn NewsProvider> = Arc::new(
        NewsApiClient::new(config.newsapi_key.clone(), http.clone())
            .with_base_url(&config.news.newsapi_base_url)
            .with_timeout(config.news.http_timeout),
    );
    let cache = CatalogCache::new(provider.clone(), clock.clone()).with_ttl(config.news.catalog_ttl);
    let resolver = Arc::new(SourceResolver::new(config.curated_sources.as_slice(), cache));
    let filter = config.news.filter.clone();
    let limits = WindowLimits {
        max_days: config.news.max_window_days,
        provider_min_date: config.news.provider_min_date,
    };
    let fetcher = || Fetcher::new(provider.clone(), resolver.clone(), filter.clone(), limits, clock.clone());

    let language = config.news.canonical_language.clone();
    let understanding: Arc<dyn TextUnderstanding> = Arc::new(LlmUnderstanding::new(chat.clone()));
    let desk = NewsDesk::new(
        Understanding::new(Some(understanding), language.clone()),
        fetcher(),
        BriefRenderer::new(Some(chat.clone()), language).with_commentary(config.news.commentary),
        provider.clone(),
        clock.clone(),
    )
    .with_max_articles(config.news.max_articles)
    .with_api_key(&config.newsapi_key);

    let market = MarketData::new(http.clone())
        .with_base_urls(&config.market.chart_base_url, &config.market.coingecko_base_url);
    let mut analyst = Analyst::new(market, fetcher(), chat.clone(), config.market.clone(), clock.clone());
    if !config.gnews_api_key.is_empty() {
        analyst = analyst.with_gnews(
            GNewsClient::new(config.gnews_api_key.clone(), http)
                .with_base_url(&config.news.gnews_base_url)
                .with_timeout(config.news.http_timeout),
        );
    } else {
        info!("GNews fallback disabled (no gnews_api_key)");
    }

    let sessions = ConversationStore::new(config.persona.clone(), config.conversation);
    Engine::new(chat, Arc::new(openai.clone()), Arc::new(openai), desk, analyst, sessions)
        .with_stickers(config.stickers.clone())
        .with_analyst_prompt(config.analyst_prompt.clone())
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "newsbrief.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config from {config_path}: {e}");
            std::process::exit(1);
        }
    };

    let (bot_http, http) = match (
        apply_proxy(teloxide::net::default_reqwest_settings(), &config.proxy).and_then(|b| b.build()),
        apply_proxy(reqwest::Client::builder(), &config.proxy).and_then(|b| b.build()),
    ) {
        (Ok(bot_http), Ok(http)) => (bot_http, http),
        (Err(e), _) | (_, Err(e)) => {
            eprintln!("Failed to build HTTP client: {e}");
            std::process::exit(1);
        }
    };
    let bot = Bot::with_client(&config.telegram_bot_token, bot_http);

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("newsbrief.log"))
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to open log file in {}: {e}", log_dir.display());
            std::process::exit(1);
        }
    };
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        );

    if let Some(admin) = config.admin_user_id {
        let tg_layer = telegram_log::TelegramLogLayer::new(bot.clone(), ChatId(admin.0 as i64));
        registry.with(tg_layer).init();
    } else {
        registry.init();
    }

    info!("🚀 Starting newsbrief...");
    info!("Loaded config from {}", config.config_path.display());
    info!("Proxy: {}", config.proxy.describe());
    info!("Curated sources: {}", config.curated_sources.join(", "));

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let engine = Arc::new(build_engine(&config, http, clock.clone()));
    let telegram = Arc::new(TelegramClient::new(bot.clone()));

    if let Some(ref digest_config) = config.digest {
        digest::spawn(engine.clone(), telegram.clone(), digest_config.clone(), clock);
    } else {
        info!("Daily digest disabled (no digest_chat_id)");
    }

    let state = Arc::new(BotState {
        engine,
        telegram,
        proxy: config.proxy.clone(),
    });

    let handler = Update::filter_message()
        .branch(dptree::entry().filter_command::<Command>().endpoint(handle_command))
        .branch(dptree::endpoint(handle_new_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn handle_command(bot: Bot, msg: Message, cmd: Command, state: Arc<BotState>) -> ResponseResult<()> {
    let chat_id = msg.chat.id.0;
    let reply_to = Some(msg.id.0 as i64);
    info!("⌨️ Command in chat {chat_id}");

    let replies = match cmd {
        Command::Ping => vec![Reply::Text("✅ Bot is running".into())],
        Command::Advise => {
            state.telegram.send_text(chat_id, ANALYZING, reply_to).await.ok();
            vec![Reply::Text(state.engine.advise().await)]
        }
        Command::NewsHealth => vec![Reply::Text(state.engine.news_health().await)],
        Command::Edit(instruction) => state.engine.edit_command(chat_id, &instruction).await,
        Command::Voice(text) => state.engine.voice_command(&text).await,
        Command::Reset => {
            let inbound = Inbound {
                chat_id,
                user_id: msg.from.as_ref().map(|u| u.id.0 as i64).unwrap_or(chat_id),
                is_private: matches!(msg.chat.kind, ChatKind::Private(_)),
                addressed: true,
                text: String::new(),
            };
            state.engine.reset(&inbound).await
        }
        Command::NetDiag => {
            let proxy = state.proxy.describe();
            let text = match bot.get_me().await {
                Ok(me) => format!("Telegram OK ✅\nProxy: {proxy}\nBot: @{}", me.username()),
                Err(e) => format!("Telegram FAIL ❌\nProxy: {proxy}\nError: {e}"),
            };
            vec![Reply::Text(text)]
        }
    };

    state.telegram.deliver(chat_id, replies, reply_to).await;
    Ok(())
}

async fn handle_new_message(msg: Message, me: Me, state: Arc<BotState>) -> ResponseResult<()> {
    let is_private = matches!(msg.chat.kind, ChatKind::Private(_));
    let is_group = matches!(msg.chat.kind, ChatKind::Public(_));
    if !is_private && !is_group {
        return Ok(());
    }

    let Some(ref user) = msg.from else {
        return Ok(());
    };
    if user.is_bot {
        return Ok(());
    }

    let text = msg.text().or(msg.caption()).unwrap_or("").to_string();
    let replied_to_bot = msg
        .reply_to_message()
        .and_then(|reply| reply.from.as_ref())
        .is_some_and(|u| u.id == me.id);
    let mentioned = text.contains(&format!("@{}", me.username()));

    let inbound = Inbound {
        chat_id: msg.chat.id.0,
        user_id: user.id.0 as i64,
        is_private,
        addressed: replied_to_bot || mentioned,
        text,
    };
    let reply_to = Some(msg.id.0 as i64);

    let replies = if let Some(voice) = msg.voice() {
        match state.telegram.download(&voice.file.id.0).await {
            Ok(audio) => state.engine.handle_voice(&inbound, audio).await,
            Err(e) => {
                warn!("Voice download failed: {e}");
                return Ok(());
            }
        }
    } else if let Some((file_id, media_type)) = attached_image(&msg) {
        match state.telegram.download(&file_id).await {
            Ok(data) => {
                let image = llm::Image { data, media_type };
                state.engine.handle_photo(&inbound, image).await
            }
            Err(e) => {
                warn!("Image download failed: {e}");
                return Ok(());
            }
        }
    } else if msg.text().is_some() {
        let preview: String = inbound.text.chars().take(100).collect();
        info!(
            "📨 Message from {} in {}: \"{preview}\"",
            user.username.as_deref().unwrap_or(&user.first_name),
            inbound.chat_id
        );
        state.engine.handle_text(&inbound).await
    } else {
        return Ok(());
    };

    if replies.is_empty() {
        return Ok(());
    }
    state.telegram.deliver(inbound.chat_id, replies, reply_to).await;
    Ok(())
}

/// File id and media type of a photo, or of a document that is an image.
fn attached_image(msg: &Message) -> Option<(String, String)> {
    if let Some(sizes) = msg.photo() {
        // Telegram lists sizes smallest first
        return sizes.last().map(|p| (p.file.id.0.clone(), "image/jpeg".to_string()));
    }
    let doc = msg.document()?;
    let mime = doc.mime_type.as_ref()?.essence_str().to_string();
    if !mime.starts_with("image/") {
        if let Some(ref name) = doc.file_name {
            info!("Ignoring document {name} ({mime})");
        }
        return None;
    }
    Some((doc.file.id.0.clone(), mime))
}
