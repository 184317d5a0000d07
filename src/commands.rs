use std::sync::Arc;

use anyhow::Context as _;

use crate::app::book_store::{BookStore, LocalFsBookStore};
use crate::app::generator::{BookGenerator, GenerationSettings};
use crate::app::model::{BookStatus, Character, GenerateBookRequest};
use crate::app::queue::InProcessQueue;
use crate::cli::{GenerateArgs, RenderArgs, StatusArgs};
use crate::config::ProviderConfig;
use crate::image_client::HttpImageClient;
use crate::render::render_book_html;
use crate::story_client::HttpStoryTextClient;

pub async fn generate(args: GenerateArgs) -> anyhow::Result<()> {
    let config = ProviderConfig::from_env()?;
    tracing::info!(?config, data_dir = %args.data_dir.display(), "generating book");

    let http = config.http_client()?;
    let store: Arc<dyn BookStore> = Arc::new(LocalFsBookStore::new(&args.data_dir));
    let generator = Arc::new(BookGenerator::new(
        Arc::clone(&store),
        Arc::new(HttpStoryTextClient::new(
            http.clone(),
            &config.base_url,
            config.api_key.clone(),
        )),
        Arc::new(HttpImageClient::new(http, &config.base_url, config.api_key.clone())),
        InProcessQueue::new(1),
        GenerationSettings::from_provider(&config),
    ));

    let request = GenerateBookRequest {
        story_idea: args.idea,
        age_range: args.age,
        illustration_style: args.style,
        page_count_hint: args.pages,
        character: args.character.map(|name| Character {
            name,
            kind: args.character_kind,
            traits: Vec::new(),
        }),
        narrator_voice: args.voice,
    };
    let book = generator.create_book(&request, None).await?;
    let book_id = book.id.clone();
    Arc::clone(&generator)
        .run_pipeline(book_id.clone(), request)
        .await;

    let book = store
        .get(&book_id)
        .await?
        .with_context(|| format!("book disappeared: {book_id}"))?;
    println!("{}", serde_json::to_string_pretty(&book.status_view())?);
    match book.status {
        BookStatus::Completed => {
            eprintln!("book_id: {book_id}");
            Ok(())
        }
        _ => anyhow::bail!(
            "book {book_id} failed: {}",
            book.error_message.as_deref().unwrap_or("unknown error")
        ),
    }
}

pub async fn status(args: StatusArgs) -> anyhow::Result<()> {
    let store = LocalFsBookStore::new(&args.data_dir);
    let book = store
        .get(&args.book_id)
        .await?
        .with_context(|| format!("book not found: {}", args.book_id))?;
    println!("{}", serde_json::to_string_pretty(&book.status_view())?);
    Ok(())
}

pub async fn render(args: RenderArgs) -> anyhow::Result<()> {
    if args.out.exists() && !args.force {
        anyhow::bail!(
            "output already exists: {} (pass --force to overwrite)",
            args.out.display()
        );
    }

    let store = LocalFsBookStore::new(&args.data_dir);
    let book = store
        .get(&args.book_id)
        .await?
        .with_context(|| format!("book not found: {}", args.book_id))?;
    let html = render_book_html(&book)?;

    if let Some(parent) = args.out.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("create output dir: {}", parent.display()))?;
    }
    tokio::fs::write(&args.out, html)
        .await
        .with_context(|| format!("write html: {}", args.out.display()))?;
    tracing::info!(book_id = %book.id, out = %args.out.display(), "book rendered");
    Ok(())
}
