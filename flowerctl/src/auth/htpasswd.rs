//! htpasswd credential files
//!
//! The password only ever travels on htpasswd's stdin. The file is built
//! under a temp name, restricted to `root:<web group>` 0640 and then renamed
//! into place, so it is never visible with looser permissions.

use secrecy::SecretString;
use tracing::{debug, info};

use crate::context::HostContext;
use crate::errors::{AuthError, AuthErrorKind};
use crate::filesys::file::File;
use crate::models::request::{BasicAuth, WebServerKind};
use crate::runner::CommandSpec;
use crate::utils::generate_password;
use crate::webserver;

/// Mode of the credentials file
pub const CREDENTIALS_MODE: u32 = 0o640;

/// Length of generated passwords
pub const GENERATED_PASSWORD_LEN: usize = 24;

/// Result of [`set_credentials`], with the pre-run state for rollback
#[derive(Debug)]
pub struct CredentialsChange {
    pub file: File,
    pub previous: Option<String>,
    /// Shown once in the summary, never logged
    pub generated_password: Option<SecretString>,
    pub changed: bool,
}

/// Whether `text` holds an entry for `user`
pub fn has_user(text: &str, user: &str) -> bool {
    text.lines()
        .any(|line| line.split_once(':').map(|(u, _)| u) == Some(user))
}

/// Check a password against the file with `htpasswd -v`
async fn verify(
    ctx: &HostContext,
    file: &File,
    user: &str,
    password: &SecretString,
) -> Result<bool, AuthError> {
    let path = file.path().display().to_string();
    let out = ctx
        .run_spec(
            CommandSpec::new("htpasswd", ["-v", "-i", path.as_str(), user])
                .with_stdin(password.clone()),
        )
        .await
        .map_err(|e| AuthError::new(AuthErrorKind::HashFailed, e.to_string()))?;
    Ok(out.is_success())
}

/// Restrict ownership and mode of a credentials file
async fn restrict(ctx: &HostContext, file: &File) -> Result<(), AuthError> {
    let owner = format!("root:{}", ctx.settings.web_group);
    let path = file.path().display().to_string();
    let out = ctx
        .run("chown", [owner.as_str(), path.as_str()])
        .await
        .map_err(|e| AuthError::new(AuthErrorKind::Io, e.to_string()))?;
    if !out.is_success() {
        return Err(AuthError::new(
            AuthErrorKind::Io,
            format!("chown {} failed: {}", owner, out.diagnostic()),
        ));
    }
    file.set_mode(CREDENTIALS_MODE).await?;
    Ok(())
}

/// Create or update the credentials file for a domain. Re-running with the
/// same credentials leaves the file untouched.
pub async fn set_credentials(
    ctx: &HostContext,
    kind: WebServerKind,
    domain: &str,
    auth: &BasicAuth,
) -> Result<CredentialsChange, AuthError> {
    let file = webserver::for_kind(kind).credentials_file(&ctx.layout, domain);
    let previous = file.read_optional().await?;
    let user = auth.username.as_str();

    if let Some(text) = previous.as_deref() {
        let unchanged = match auth.password.as_ref() {
            None => has_user(text, user),
            Some(password) => has_user(text, user) && verify(ctx, &file, user, password).await?,
        };
        if unchanged {
            debug!("Credentials for {} unchanged", user);
            return Ok(CredentialsChange {
                file,
                previous,
                generated_password: None,
                changed: false,
            });
        }
    }

    let (password, generated_password) = match auth.password.as_ref() {
        Some(password) => (password.clone(), None),
        None => {
            let password = SecretString::from(generate_password(GENERATED_PASSWORD_LEN));
            (password.clone(), Some(password))
        }
    };

    if let Some(parent) = file.path().parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let temp = File::new(file.temp_path());
    let temp_path = temp.path().display().to_string();

    let result: Result<(), AuthError> = async {
        let out = ctx
            .run_spec(
                CommandSpec::new("htpasswd", ["-c", "-B", "-i", temp_path.as_str(), user])
                    .with_stdin(password),
            )
            .await
            .map_err(|e| AuthError::new(AuthErrorKind::HashFailed, e.to_string()))?;
        if !out.is_success() {
            return Err(AuthError::new(AuthErrorKind::HashFailed, out.diagnostic()));
        }
        restrict(ctx, &temp).await?;
        tokio::fs::rename(temp.path(), file.path()).await?;
        Ok(())
    }
    .await;

    if let Err(e) = result {
        let _ = temp.delete().await;
        return Err(e);
    }

    info!("Wrote credentials for {} to {:?}", user, file.path());
    Ok(CredentialsChange {
        file,
        previous,
        generated_password,
        changed: true,
    })
}

/// Put the credentials file back the way it was before [`set_credentials`]
pub async fn restore_credentials(
    ctx: &HostContext,
    change: &CredentialsChange,
) -> Result<(), AuthError> {
    if !change.changed {
        return Ok(());
    }
    match change.previous.as_deref() {
        Some(text) => {
            let temp = File::new(change.file.temp_path());
            temp.write_atomic(text.as_bytes()).await?;
            restrict(ctx, &temp).await?;
            tokio::fs::rename(temp.path(), change.file.path()).await?;
        }
        None => change.file.delete().await?,
    }
    Ok(())
}

/// Remove the credentials file for a domain. Returns whether one existed.
pub async fn remove_credentials(
    ctx: &HostContext,
    kind: WebServerKind,
    domain: &str,
) -> Result<bool, AuthError> {
    let file = webserver::for_kind(kind).credentials_file(&ctx.layout, domain);
    if !file.exists().await {
        return Ok(false);
    }
    file.delete().await?;
    Ok(true)
}
