use tokio::process::Command;

use super::EngineHandle;
use crate::command::{run_streaming, tool_command};
use crate::error::{AppError, Result};
use crate::progress::Reporter;

fn psql(handle: &EngineHandle, superuser: &str) -> Command {
    let mut cmd = tool_command(handle.tool("psql"));
    cmd.args(["-h", "127.0.0.1", "-p"])
        .arg(handle.port.to_string())
        .args(["-U", superuser, "-d", "postgres", "-v", "ON_ERROR_STOP=1"]);
    cmd
}

fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn sql_identifier(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

/// Create `role` (LOGIN CREATEDB) on the managed cluster unless it exists.
///
/// Every failure is a `RoleCreationFailed`; callers treat it as soft.
pub async fn ensure_role(
    handle: &EngineHandle,
    superuser: &str,
    role: &str,
    password: &str,
    reporter: &Reporter,
) -> Result<()> {
    let psql_path = handle.tool("psql");
    if !psql_path.is_file() {
        return Err(AppError::role_creation_failed(
            role,
            format!("psql not found at {}", psql_path.display()),
        ));
    }

    let exists = psql(handle, superuser)
        .arg("-tAc")
        .arg(format!(
            "SELECT 1 FROM pg_roles WHERE rolname = {}",
            sql_literal(role)
        ))
        .output()
        .await
        .map_err(|e| AppError::role_creation_failed(role, e.to_string()))?;
    if !exists.status.success() {
        return Err(AppError::role_creation_failed(
            role,
            String::from_utf8_lossy(&exists.stderr).trim().to_string(),
        ));
    }
    if String::from_utf8_lossy(&exists.stdout).trim() == "1" {
        reporter.log(format!("Database role {} already exists", role));
        return Ok(());
    }

    reporter.log(format!("Creating database role {}...", role));
    let mut create = psql(handle, superuser);
    create.arg("-c").arg(format!(
        "CREATE ROLE {} LOGIN CREATEDB PASSWORD {}",
        sql_identifier(role),
        sql_literal(password)
    ));
    let outcome = run_streaming(&mut create, reporter)
        .await
        .map_err(|e| AppError::role_creation_failed(role, e.to_string()))?;
    if !outcome.success {
        return Err(AppError::role_creation_failed(role, outcome.summary()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::database::EngineKind;
    use crate::error::ErrorKind;

    #[test]
    fn quoting() {
        assert_eq!(sql_literal("it's"), "'it''s'");
        assert_eq!(sql_identifier("odoo_acme"), "\"odoo_acme\"");
    }

    #[tokio::test]
    async fn missing_psql_is_a_role_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let handle = EngineHandle {
            kind: EngineKind::Portable,
            port: 5433,
            bin_dir: tmp.path().join("bin"),
            data_dir: PathBuf::from("/unused"),
        };
        let err = ensure_role(&handle, "postgres", "odoo_acme", "pw", &Reporter::silent())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RoleCreationFailed);
        assert_eq!(err.payload("role"), Some("odoo_acme"));
        assert!(err.kind().is_soft());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn existing_role_is_left_alone() {
        use std::os::unix::fs::PermissionsExt as _;

        let tmp = tempfile::tempdir().unwrap();
        let bin = tmp.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        let psql = bin.join("psql");
        // Prints "1" for the lookup and fails anything else.
        std::fs::write(
            &psql,
            "#!/bin/sh\nfor a in \"$@\"; do case \"$a\" in -tAc) echo 1; exit 0;; esac; done\nexit 1\n",
        )
        .unwrap();
        std::fs::set_permissions(&psql, std::fs::Permissions::from_mode(0o755)).unwrap();

        let handle = EngineHandle {
            kind: EngineKind::Portable,
            port: 5433,
            bin_dir: bin,
            data_dir: tmp.path().join("data"),
        };
        ensure_role(&handle, "postgres", "odoo_acme", "pw", &Reporter::silent())
            .await
            .unwrap();
    }
}
