use dialoguer::{Confirm, Input, Select};
use std::path::PathBuf;
use tracing::{event, Level};
use userpage_lib::{
    ImageFile, PageMode, PicturePreview, ProfileField, ProfilePage, RemoteBackend, SessionCache,
};

const VIEW_ACTIONS: [&str; 4] = ["Edit Profile", "Delete Your Account", "Reload", "Quit"];

/// Runs the interactive page until the user quits or deletes the account.
/// Backend failures are logged by the page itself and leave the page where
/// it was.
pub async fn run(backend: RemoteBackend, id: String, cache: &SessionCache) -> anyhow::Result<()> {
    let mut page = ProfilePage::mount(id, backend).await;

    loop {
        match page.mode() {
            PageMode::Viewing => {
                match page.view() {
                    Some(profile) => println!("\n{}\n", profile),
                    None => println!("\nNo profile for {}\n", page.id()),
                }

                let choice = Select::new()
                    .with_prompt("Profile")
                    .items(&VIEW_ACTIONS)
                    .default(0)
                    .interact()?;
                match choice {
                    0 => {
                        if let Err(err) = page.begin_edit() {
                            event!(Level::WARN, error = %err, "Cannot edit");
                        }
                    }
                    1 => {
                        if delete(&mut page, cache).await? {
                            return Ok(());
                        }
                    }
                    2 => {
                        let _ = page.load().await;
                    }
                    _ => return Ok(()),
                }
            }
            PageMode::Editing => edit_step(&mut page).await?,
        }
    }
}

async fn edit_step(page: &mut ProfilePage<RemoteBackend>) -> anyhow::Result<()> {
    let Some(draft) = page.draft() else {
        return Ok(());
    };

    let mut items: Vec<String> = ProfileField::ALL
        .iter()
        .map(|field| format!("{}: {}", field.label(), draft.get(*field)))
        .collect();
    items.push(match page.picture_preview() {
        Some(PicturePreview::Pending(image)) => {
            format!("Picture: new {} ({} bytes)", image.content_type, image.bytes.len())
        }
        Some(PicturePreview::Stored(url)) => format!("Picture: {}", url),
        None => "Picture: (none)".to_string(),
    });
    items.push("Save".to_string());

    let choice = Select::new()
        .with_prompt("Edit Profile")
        .items(&items)
        .default(0)
        .interact()?;

    if let Some(field) = ProfileField::ALL.get(choice).copied() {
        let current = draft.get(field).to_string();
        let value: String = Input::new()
            .with_prompt(field.label())
            .with_initial_text(current)
            .allow_empty(true)
            .interact_text()?;
        page.set_field(field, value)?;
    } else if choice == ProfileField::ALL.len() {
        let path: String = Input::new().with_prompt("Image file").interact_text()?;
        let path = PathBuf::from(path);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let content_type = mime_guess::from_path(&path)
                    .first_or_octet_stream()
                    .to_string();
                page.select_image(ImageFile::new(bytes, content_type))?;
            }
            Err(err) => {
                event!(Level::WARN, path = %path.display(), error = %err, "Cannot read image")
            }
        }
    } else {
        let _ = page.save().await;
    }

    Ok(())
}

/// Returns true once the record is gone.
async fn delete(page: &mut ProfilePage<RemoteBackend>, cache: &SessionCache) -> anyhow::Result<bool> {
    let Some(session) = cache.load()? else {
        event!(Level::WARN, "Deleting an account needs a signed-in session");
        return Ok(false);
    };
    if session.uid != page.id() {
        event!(Level::WARN, uid = %session.uid, id = %page.id(), "Signed in as a different account");
        return Ok(false);
    }

    let confirmed = Confirm::new()
        .with_prompt("Delete your profile and account?")
        .default(false)
        .interact()?;
    if !confirmed {
        return Ok(false);
    }

    match page.delete(&session).await {
        Ok(report) => {
            cache.clear()?;
            if report.is_complete() {
                println!("Account deleted");
            }
            Ok(true)
        }
        Err(_) => Ok(false),
    }
}
