//! Basic Bidi example - starting a session, navigating, running script

use bidi::{BidiSession, SessionConfig, SessionEvent};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let config = SessionConfig {
        ws_url: "ws://localhost:9222/session".to_string(),
        ..SessionConfig::default()
    };
    println!("Connecting to: {}", config.ws_url);

    let session = BidiSession::new(config);
    session.start().await?;
    println!("Session started: {:?}", session.session_id());

    // Watch session events in the background
    let mut events = session.events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let SessionEvent::PromptOpened { context, message } = event {
                println!("Prompt opened in {}: {}", context, message);
            }
        }
    });

    let context = session
        .current_context()
        .ok_or("no browsing context available")?;
    println!("Current context: {}", context);

    session.navigate(&context, "https://example.com").await?;
    println!("Navigation complete");

    // Exceptions come back with the stack pointing at this source
    match session
        .execute_script(&context, "return document.title;", Vec::new())
        .await
    {
        Ok(value) => println!("Title: {:?}", value),
        Err(e) => println!("Script failed:\n{}", e),
    }

    // Clean shutdown
    session.end().await?;
    println!("Session ended");

    Ok(())
}
