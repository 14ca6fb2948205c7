use sdbridge::logger::{self, LogLevel, LoggerConfig};
use sdbridge::{
    ConditioningMode, ConditioningSlot, GenerationMode, GenerationParams, ImageSource,
    Interrogator, RenderSettings, SceneState, SdClient, ServerCatalog, ServerConfig,
};
use std::env;
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dotenv_loaded = dotenv::dotenv().is_ok();

    logger::init_with_config(LoggerConfig::development().with_level(LogLevel::Debug))?;

    if dotenv_loaded {
        log::info!("✅ .env file loaded successfully");
    } else {
        log::warn!("⚠️  No .env file found, using system environment variables");
    }

    let mut args = env::args().skip(1);
    let image_path = match args.next() {
        Some(path) => PathBuf::from(path),
        None => {
            log::error!("❌ Usage: sdbridge <rendered-image.png> [prompt]");
            return Err("missing image path".into());
        }
    };
    let prompt = args
        .next()
        .or_else(|| env::var("SD_PROMPT").ok())
        .unwrap_or_else(|| "a detailed photograph".to_string());

    let config = ServerConfig::from_env();
    logger::log_config_info(&config);

    log::info!("🔄 Connecting to the Stable Diffusion server...");
    let mut client = SdClient::connect(config).await?;
    if client.catalog().is_empty() {
        log::warn!("⚠️  Server catalog unavailable, using the built-in module table");
        client = client.with_catalog(ServerCatalog::builtin());
    } else {
        log::info!("✅ Connected, {} modules available", client.catalog().modules.len());
    }

    let mode = match env::var("SD_MODE") {
        Ok(value) => value.parse::<GenerationMode>()?,
        Err(_) => GenerationMode::TextToImage,
    };

    let slots = conditioning_slots(env::var("SD_CONTROLNET").unwrap_or_default())?;
    for slot in &slots {
        log::info!("🧩 Conditioning unit: {}", slot.mode.display_name());
    }

    let frame = ImageSource::File(image_path);

    if let Ok(name) = env::var("SD_INTERROGATE") {
        let interrogator = name.parse::<Interrogator>()?;
        match client.interrogate().caption(&frame, interrogator).await {
            Ok(caption) => log::info!("📝 Caption ({}): {}", interrogator, caption),
            Err(e) => log::warn!("⚠️  Interrogation failed: {}", e.user_message()),
        }
    }

    let scene = SceneState::new(
        RenderSettings::default(),
        GenerationParams::new(prompt).with_mode(mode),
    )
    .with_frame(frame);

    match client.generate(&scene, &slots).await {
        Ok(result) => {
            log::info!("🎉 Generated image: {}", result.image_path.display());
            if !result.archived {
                log::warn!("⚠️  Image was not archived, it only exists in the temp dir");
            }
            Ok(())
        }
        Err(e) => {
            log::error!("❌ {}", e.user_message());
            Err(e.into())
        }
    }
}

fn conditioning_slots(list: String) -> Result<Vec<ConditioningSlot>, String> {
    list.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| name.parse::<ConditioningMode>().map(ConditioningSlot::new))
        .collect()
}
