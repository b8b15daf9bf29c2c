use std::io::BufRead;
use std::io::Write;

use anyhow::Context;
use clap::Parser;
use pyval_bot::Cli;
use pyval_bot::Credentials;
use pyval_bot::irc::split_login;
use pyval_bot::run_main;
use pyval_core::Config;
use pyval_utils_home_dir::ensure_pyval_home;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let home = ensure_pyval_home().context("failed to prepare the PyVal home directory")?;
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| Config::default_path(&home));
    let mut config = Config::load(&config_path)?;
    cli.apply(&mut config);

    if cli.dump_config {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    let mut credentials = Credentials::default();
    if cli.login_password {
        let login = read_secret("server password")?;
        match split_login(&login) {
            (user, Some(password)) => {
                config.irc.username = Some(user);
                credentials.server_password = Some(password);
            }
            (password, None) => credentials.server_password = Some(password),
        }
    }
    if cli.password {
        credentials.nickserv_password = Some(read_secret("NickServ password")?);
    }

    run_main(config, home, credentials, cli.debug).await
}

/// One line from stdin, without the newline.
fn read_secret(what: &str) -> anyhow::Result<String> {
    eprint!("{what}: ");
    std::io::stderr().flush()?;
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .with_context(|| format!("failed to read the {what}"))?;
    let secret = line.trim_end_matches(['\r', '\n']).to_string();
    if secret.is_empty() {
        anyhow::bail!("no {what} given");
    }
    Ok(secret)
}
