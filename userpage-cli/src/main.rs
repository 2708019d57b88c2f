mod page;

use anyhow::{bail, Context};
use dialoguer::{Input, Password};
use std::path::PathBuf;
use structopt::StructOpt;
use tracing_subscriber::EnvFilter;
use userpage_lib::{
    AuthService, DocumentStore, ProfileField, RemoteBackend, SessionCache, UserProfile,
    USERS_COLLECTION,
};

#[derive(Debug, StructOpt)]
#[structopt(name = "userpage", about = "View and edit your userpage profile")]
struct Opt {
    #[structopt(long, default_value = "http://127.0.0.1:8080")]
    server: String,
    /// Where the signed-in session is remembered
    #[structopt(long, parse(from_os_str), default_value = "userpage-session")]
    db_path: PathBuf,
    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Create an account and its profile
    SignUp,
    SignIn {
        #[structopt(long)]
        email: Option<String>,
    },
    SignOut,
    /// Open the profile page
    Page {
        /// Profile to open; defaults to the signed-in account
        #[structopt(long)]
        id: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let opt = Opt::from_args();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cache = SessionCache::open(&opt.db_path)
        .with_context(|| format!("opening session cache {}", opt.db_path.display()))?;
    let backend = RemoteBackend::new(opt.server);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(async move {
        match opt.command {
            Command::SignUp => sign_up(&backend, &cache).await,
            Command::SignIn { email } => sign_in(&backend, &cache, email).await,
            Command::SignOut => sign_out(&backend, &cache).await,
            Command::Page { id } => {
                let session = cache.load()?;
                let id = match (id, &session) {
                    (Some(id), _) => id,
                    (None, Some(session)) => session.uid.clone(),
                    (None, None) => bail!("no --id given and nobody is signed in"),
                };
                // Writes are only accepted for the signed-in account
                let backend = match session {
                    Some(session) => backend.with_session(session),
                    None => backend,
                };
                page::run(backend, id, &cache).await
            }
        }
    })
}

async fn sign_up(backend: &RemoteBackend, cache: &SessionCache) -> anyhow::Result<()> {
    let email: String = Input::new().with_prompt("Email").interact_text()?;
    let password = Password::new()
        .with_prompt("Password")
        .with_confirmation("Repeat password", "Passwords do not match")
        .interact()?;

    let session = backend.sign_up(&email, &password).await?;
    cache.store(&session)?;

    let mut profile = UserProfile {
        email,
        ..Default::default()
    };
    for field in ProfileField::ALL {
        let value: String = Input::new()
            .with_prompt(field.label())
            .with_initial_text(profile.get(field))
            .allow_empty(true)
            .interact_text()?;
        profile.set(field, value);
    }
    backend
        .clone()
        .with_session(session.clone())
        .set(USERS_COLLECTION, &session.uid, &profile.scalar_fields())
        .await?;

    println!("Signed up as {}", session.uid);
    Ok(())
}

async fn sign_in(
    backend: &RemoteBackend,
    cache: &SessionCache,
    email: Option<String>,
) -> anyhow::Result<()> {
    let email = match email {
        Some(email) => email,
        None => Input::new().with_prompt("Email").interact_text()?,
    };
    let password = Password::new().with_prompt("Password").interact()?;

    let session = backend.sign_in(&email, &password).await?;
    cache.store(&session)?;

    println!("Signed in as {}", session.uid);
    Ok(())
}

async fn sign_out(backend: &RemoteBackend, cache: &SessionCache) -> anyhow::Result<()> {
    let Some(session) = cache.load()? else {
        println!("Nobody is signed in");
        return Ok(());
    };

    backend.sign_out(&session).await?;
    cache.clear()?;

    println!("Signed out");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_defaults_to_the_local_server() {
        let opt = Opt::from_iter(["userpage", "page", "--id", "u1"]);
        assert_eq!(opt.server, "http://127.0.0.1:8080");
        assert_eq!(opt.db_path, PathBuf::from("userpage-session"));
        assert!(matches!(opt.command, Command::Page { id: Some(id) } if id == "u1"));
    }

    #[test]
    fn subcommands_are_kebab_case() {
        let opt = Opt::from_iter(["userpage", "--server", "http://host:1", "sign-in", "--email", "a@b.com"]);
        assert_eq!(opt.server, "http://host:1");
        assert!(matches!(opt.command, Command::SignIn { email: Some(email) } if email == "a@b.com"));
        assert!(Opt::from_iter_safe(["userpage", "sign-up"]).is_ok());
        assert!(Opt::from_iter_safe(["userpage", "bogus"]).is_err());
    }
}
