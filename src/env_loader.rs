use std::env;
use std::path::PathBuf;

fn fallback_dotenv_path(favsync_home: Option<PathBuf>, home_dir: Option<PathBuf>) -> Option<PathBuf> {
    match (favsync_home, home_dir) {
        (Some(favsync_home), _) => Some(favsync_home.join(".env")),
        (None, Some(home)) => Some(home.join("favsync/.env")),
        (None, None) => None,
    }
}

pub fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let fallback = fallback_dotenv_path(
        env::var_os("FAVSYNC_HOME").map(PathBuf::from),
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
    fn fallback_prefers_favsync_home() {
        let got = fallback_dotenv_path(
            Some(PathBuf::from("/srv/favsync")),
            Some(PathBuf::from("/home/alice")),
        );
        assert_eq!(got, Some(PathBuf::from("/srv/favsync/.env")));
    }

    #[test]
    fn fallback_uses_home_when_favsync_home_unset() {
        let got = fallback_dotenv_path(None, Some(PathBuf::from("/home/alice")));
        assert_eq!(got, Some(PathBuf::from("/home/alice/favsync/.env")));
    }

    #[test]
    fn no_fallback_without_any_home() {
        assert_eq!(fallback_dotenv_path(None, None), None);
    }
}
