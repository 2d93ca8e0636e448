use std::env;
use std::path::PathBuf;

fn fallback_dotenv_path(vault_home: Option<PathBuf>, home_dir: Option<PathBuf>) -> Option<PathBuf> {
    match (vault_home, home_dir) {
        (Some(base), _) => Some(base.join(".env")),
        (None, Some(home)) => Some(home.join(".snipvault").join(".env")),
        (None, None) => None,
    }
}

/// Loads `.env` from the working directory, else from the snipvault home.
/// Variables already set in the process environment win.
pub fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let fallback = fallback_dotenv_path(
        env::var_os("SNIPVAULT_HOME").map(PathBuf::from),
        dirs::home_dir(),
    );

    let Some(path) = fallback else {
        return;
    };
    if path.is_file() {
        let _ = dotenvy::from_path(&path);
    }
}

#[cfg(test)]
mod tests {
    use super::fallback_dotenv_path;
    use std::path::PathBuf;

    #[test]
    fn vault_home_holds_env_file_directly() {
        let got = fallback_dotenv_path(
            Some(PathBuf::from("/srv/snipvault")),
            Some(PathBuf::from("/home/sam")),
        );
        assert_eq!(got, Some(PathBuf::from("/srv/snipvault/.env")));
    }

    #[test]
    fn home_dir_uses_dot_snipvault() {
        let got = fallback_dotenv_path(None, Some(PathBuf::from("/home/sam")));
        assert_eq!(got, Some(PathBuf::from("/home/sam/.snipvault/.env")));
    }

    #[test]
    fn nothing_to_fall_back_on() {
        assert_eq!(fallback_dotenv_path(None, None), None);
    }
}
