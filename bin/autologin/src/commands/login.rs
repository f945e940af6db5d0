use autologin_browser::inject::cookie_value;
use autologin_browser::{
    manual_login_script, ApiKeyHarvester, BrowserSession, CdpDriver, CookieMethod,
    DashboardStatus, DisplayMode, LaunchOptions, SessionInjector,
};
use autologin_core::{Config, Paths};
use autologin_storage::shell_env::export_line;
use autologin_storage::{read_account, AccountSession, EnvUpdate, EnvWriter};
use std::time::Duration;
use tracing::debug;

const RULE_WIDTH: usize = 60;
const PREVIEW_CHARS: usize = 50;

fn rule() -> String {
    "=".repeat(RULE_WIDTH)
}

fn banner(title: &str) {
    println!();
    println!("{}", rule());
    println!("{}", title);
    println!("{}", rule());
}

pub async fn run(mode_arg: Option<String>) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;
    let mode = DisplayMode::from_cli_arg(mode_arg.as_deref());

    banner("Cursor auto login");
    match mode {
        DisplayMode::Headless => println!("Mode: headless (no browser window)"),
        DisplayMode::Visible => println!("Mode: visible (browser window shown)"),
    }
    println!("{}", rule());

    println!();
    println!("Reading cached account...");
    let db_path = config.state_db_path();
    let account = match read_account(&db_path) {
        Ok(account) => account,
        Err(e) => {
            println!();
            println!("✗ Could not read account data: {}", e);
            println!("Make sure that:");
            println!("  1. the Cursor desktop client is installed");
            println!("  2. you have signed in to it at least once");
            println!("  3. {} exists", db_path.display());
            return Ok(());
        }
    };

    banner("Account");
    println!("Email:   {}", account.email());
    println!("User ID: {}", account.user_id());
    println!("Token:   {}...", account.token_preview(PREVIEW_CHARS));
    println!("Expires: {}", account.expiry());
    println!("{}", rule());

    if login(&config, &paths, mode, &account).await {
        println!();
        println!("✓ Auto login complete");
    } else {
        print_manual_login(&config, &account);
    }
    Ok(())
}

/// Drive the browser through cookie injection and key creation.
/// Returns whether the session cookie was installed.
async fn login(
    config: &Config,
    paths: &Paths,
    mode: DisplayMode,
    account: &AccountSession,
) -> bool {
    println!();
    println!("Starting browser login...");

    let opts = LaunchOptions {
        mode,
        binary: config.browser.binary.clone(),
        user_data_dir: paths.browser_profile_dir(mode.is_headless()),
        window_size: config.browser.window_size.clone(),
        launch_timeout: Duration::from_secs(config.browser.launch_timeout_secs),
    };

    println!("1. Launching browser...");
    let session = match BrowserSession::launch(&opts).await {
        Ok(session) => session,
        Err(e) => {
            println!("  ✗ {}", e);
            return false;
        }
    };

    let timings = config.browser.timings();
    let mut driver = CdpDriver::new(session, timings.element_timeout);

    println!("2. Installing session cookie...");
    let injector = SessionInjector::new(&config.site, timings);
    let report = match injector.inject(&mut driver, account).await {
        Ok(report) => report,
        Err(e) => {
            println!("  ✗ Session cookie not set: {}", e);
            println!("  The browser may be blocking cookies");
            finish(driver).await;
            return false;
        }
    };

    match report.cookie_method {
        CookieMethod::Native => println!("  ✓ Cookie set through the browser"),
        CookieMethod::Script => println!("  ✓ Cookie set through document.cookie"),
    }
    let preview: String = cookie_value(account).chars().take(PREVIEW_CHARS).collect();
    println!("  Cookie value: {}...", preview);
    debug!(retried = report.retried, "Cookie injected");

    println!("3. Checking dashboard...");
    if report.retried {
        println!("  ⚠ Landed on the sign-in page, retried once");
    }
    match &report.dashboard {
        DashboardStatus::Verified => println!("  ✓ Dashboard reached"),
        DashboardStatus::AuthChallenge => {
            println!("  ⚠ Still on the sign-in page, the cookie may not be accepted")
        }
        DashboardStatus::Elsewhere(url) => println!("  ⚠ Current page: {}", url),
        DashboardStatus::Unknown(reason) => {
            println!("  ⚠ Could not check the dashboard: {}", reason);
            println!("  The cookie is set anyway");
        }
    }

    banner("Logged in");
    println!("Email:   {}", account.email());
    println!("Expires: {}", account.expiry());
    println!("{}", rule());

    println!();
    println!("4. Creating API key...");
    let harvested = match ApiKeyHarvester::new(&config.site, &config.harvest, timings) {
        Ok(harvester) => harvester.harvest(&mut driver).await,
        Err(e) => Err(e),
    };

    match harvested {
        Ok(key) => {
            banner("API key created");
            println!("Name: {}", key.name);
            println!("Key:  {}", key.key);
            println!("{}", rule());
            println!("This key works with the Cursor CLI and API");

            println!();
            println!("5. Writing environment variable...");
            write_env(config, &key.key);
        }
        Err(e) => {
            println!("  ⚠ Could not create an API key automatically: {}", e);
            println!("  Create one manually at {}", config.site.integrations_url);
        }
    }

    finish(driver).await;
    true
}

fn write_env(config: &Config, key: &str) {
    let writer = EnvWriter::new(
        config.rc_file_path(),
        &config.env.var_name,
        &config.env.comment,
    );
    let rc = writer.path().display().to_string();

    match writer.write(key) {
        Ok(outcome) => {
            match outcome {
                EnvUpdate::Replaced => println!("  Updated existing {}", writer.var_name()),
                EnvUpdate::Appended => println!("  Added {}", writer.var_name()),
            }
            println!("  ✓ Written to {}", rc);
            println!("  Run `source {}` or open a new terminal to use it", rc);
        }
        Err(e) => {
            println!("  ✗ Could not write {}: {}", rc, e);
            println!("  Add this line yourself:");
            print!("  {}", export_line(writer.var_name(), key));
        }
    }
}

/// Close a headless browser; leave a visible one running for the user.
async fn finish(driver: CdpDriver) {
    let session = driver.into_session();
    if session.mode.is_headless() {
        session.close().await;
        println!();
        println!("✓ Browser closed");
    } else {
        let pid = session.detach();
        println!();
        match pid {
            Some(pid) => println!("✓ Browser left open (pid {})", pid),
            None => println!("✓ Browser left open"),
        }
    }
}

fn print_manual_login(config: &Config, account: &AccountSession) {
    println!();
    println!("✗ Auto login failed");
    println!();
    println!("Manual login:");
    println!("1. Open {}", config.site.root_url);
    println!("2. Press F12 to open the developer console");
    println!("3. Paste this line:");
    println!();
    println!("{}", "-".repeat(RULE_WIDTH));
    println!("{}", manual_login_script(&config.site, account));
    println!("{}", "-".repeat(RULE_WIDTH));
}
