use std::sync::Arc;

use biz_onboarding::backend::HttpClient;
use biz_onboarding::config::OnboardingConfig;
use biz_onboarding::onboarding::{
    OnboardingManager, OnboardingRouteState, OnboardingStep, onboarding_routes,
};
use biz_onboarding::session::{AuthClient, SessionStore, VerificationStatus};
use secrecy::SecretString;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = OnboardingConfig::from_env()?;

    eprintln!("Business onboarding v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: {}", config.api_base_url);
    eprintln!("   REST: http://0.0.0.0:{}/api/onboarding", config.http_port);
    eprintln!(
        "   Verification poll: first after {:?}, then every {:?}",
        config.poll_initial_delay, config.poll_interval
    );

    // ── Session ─────────────────────────────────────────────────────────
    let session = Arc::new(SessionStore::new());
    let client = Arc::new(HttpClient::new(config.api_base_url.clone(), Arc::clone(&session)));

    match std::env::var("ONBOARDING_AUTH_TOKEN") {
        Ok(token) if !token.trim().is_empty() => {
            let refresh = std::env::var("ONBOARDING_REFRESH_TOKEN")
                .ok()
                .map(SecretString::from);
            session.sign_in(SecretString::from(token.clone()), refresh, None);
            if let Err(e) = client.get_current_user(&token).await {
                tracing::warn!(error = %e, "Could not load current user");
                if !e.is_transient() {
                    session.clear();
                }
            }
        }
        _ => session.mark_signed_out(),
    }
    eprintln!("   Session: {:?}", session.phase());

    // ── Workflow ────────────────────────────────────────────────────────
    let manager = Arc::new(OnboardingManager::new(
        &config,
        Arc::clone(&session),
        client.clone(),
        client,
    ));

    match manager.restore_plan() {
        Ok(Some(selection)) => eprintln!("   Plan: {} (tier {})", selection.plan.id, selection.tier_number),
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, "Ignoring plan cached on the session"),
    }

    // An application already under review resumes watching.
    if let Some(status) = session.verification_status()
        && VerificationStatus::parse(&status) == VerificationStatus::Pending
    {
        manager.enter_step(OnboardingStep::Pending).await;
        manager.watch_verification().await;
        eprintln!("   Verification: pending, watching");
    }

    let app = onboarding_routes(OnboardingRouteState {
        manager: Arc::clone(&manager),
    });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.http_port)).await?;
    tracing::info!(port = config.http_port, "Onboarding server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    manager.stop_verification().await;
    tracing::info!("Onboarding server stopped");
    Ok(())
}
