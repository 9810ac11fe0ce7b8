use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::keyword::AcceptKeywords;
use crate::makeconf::{load_make_conf, merge_incremental_tokens, INCREMENTAL_VARIABLES};

/// File name of the index inside the index directory.
pub const INDEX_FILE_NAME: &str = "esearchdb.json";

/// Portage settings and esearch paths resolved from the system.
///
/// Sources are applied in this order, later ones winning: built-in
/// defaults, the profile chain's `make.defaults`, `repos.conf`,
/// `make.conf`, then the process environment.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Offset prefix of a Gentoo Prefix installation (`EPREFIX`).
    pub eprefix: PathBuf,
    /// Root of the system whose installed packages are reported (`ROOT`).
    pub root: PathBuf,
    /// Directory containing `etc/portage` (`PORTAGE_CONFIGROOT`).
    pub config_root: PathBuf,
    /// Location of the main repository.
    pub portdir: PathBuf,
    /// Overlay locations in increasing priority.
    pub overlays: Vec<PathBuf>,
    /// Effective `ACCEPT_KEYWORDS`.
    pub accept_keywords: AcceptKeywords,
    /// Effective `FEATURES`.
    pub features: Vec<String>,
    /// `NOCOLOR` requested by the configuration.
    pub nocolor: bool,
    /// Whether `ACCEPT_KEYWORDS` came from the process environment.
    pub accept_keywords_from_env: bool,
    /// Directory holding the index.
    pub index_dir: PathBuf,
    /// Output of the sync program.
    pub sync_log: PathBuf,
    /// Output of `layman -S`.
    pub layman_log: PathBuf,
}

impl Settings {
    /// Resolve settings from the running system.
    pub fn load() -> Result<Settings> {
        let env: HashMap<String, String> = std::env::vars().collect();
        Settings::load_with_env(&env)
    }

    /// Resolve settings using `env` in place of the process environment.
    pub fn load_with_env(env: &HashMap<String, String>) -> Result<Settings> {
        let eprefix = PathBuf::from(env.get("EPREFIX").map(String::as_str).unwrap_or(""));
        let prefixed = |p: &str| prefix_path(&eprefix, p);

        let config_root = env
            .get("PORTAGE_CONFIGROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| prefixed("/"));
        let root = env
            .get("ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/"));

        let portage_dir = config_root.join("etc/portage");
        let repos = ReposConf::load(&portage_dir.join("repos.conf"))?;

        let mut vars = BTreeMap::new();
        let mut incremental: HashMap<&str, Vec<String>> = HashMap::new();
        let mut scalars: HashMap<String, String> = HashMap::new();
        let mut apply = |assignments: Vec<(String, String)>| {
            for (name, value) in assignments {
                if let Some(var) = INCREMENTAL_VARIABLES.iter().find(|v| **v == name) {
                    incremental
                        .entry(*var)
                        .or_default()
                        .extend(value.split_whitespace().map(str::to_string));
                } else {
                    scalars.insert(name, value);
                }
            }
        };

        for dir in profile_chain(&portage_dir.join("make.profile"), &repos)? {
            apply(load_make_conf(&dir.join("make.defaults"), &mut vars)?);
        }
        apply(load_make_conf(&portage_dir.join("make.conf"), &mut vars)?);

        let env_assignments: Vec<(String, String)> = ["PORTDIR", "PORTDIR_OVERLAY", "NOCOLOR"]
            .iter()
            .chain(INCREMENTAL_VARIABLES)
            .filter_map(|name| Some((name.to_string(), env.get(*name)?.clone())))
            .collect();
        apply(env_assignments);

        let tokens = |name: &str| {
            merge_incremental_tokens(
                incremental
                    .get(name)
                    .into_iter()
                    .flatten()
                    .map(String::as_str),
            )
        };
        let mut accept_keywords = tokens("ACCEPT_KEYWORDS");
        if accept_keywords.is_empty() {
            if let Some(arch) = scalars.get("ARCH").filter(|a| !a.is_empty()) {
                accept_keywords.push(arch.clone());
            }
        }
        let features = tokens("FEATURES");

        let portdir = scalars
            .get("PORTDIR")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .or_else(|| repos.main_location())
            .unwrap_or_else(|| prefixed("/var/db/repos/gentoo"));
        let mut overlays = repos.overlay_locations(&portdir);
        if let Some(extra) = scalars.get("PORTDIR_OVERLAY") {
            for path in extra.split_whitespace().map(PathBuf::from) {
                if !overlays.contains(&path) && path != portdir {
                    overlays.push(path);
                }
            }
        }

        Ok(Settings {
            accept_keywords: AcceptKeywords::new(accept_keywords),
            features,
            nocolor: scalars
                .get("NOCOLOR")
                .is_some_and(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "yes" | "1")),
            accept_keywords_from_env: env.contains_key("ACCEPT_KEYWORDS"),
            index_dir: prefixed("/var/cache/edb"),
            sync_log: prefixed("/var/log/emerge-sync.log"),
            layman_log: prefixed("/var/log/layman.log"),
            eprefix,
            root,
            config_root,
            portdir,
            overlays,
        })
    }

    /// `ROOT` with `EPREFIX` appended, where the installed package
    /// database lives.
    pub fn eroot(&self) -> PathBuf {
        let prefix = self
            .eprefix
            .strip_prefix("/")
            .unwrap_or(self.eprefix.as_path());
        if prefix.as_os_str().is_empty() {
            self.root.clone()
        } else {
            self.root.join(prefix)
        }
    }

    /// Full path of the index file.
    pub fn index_path(&self) -> PathBuf {
        self.index_dir.join(INDEX_FILE_NAME)
    }

    /// Temporary file written while the index is rebuilt.
    ///
    /// Its existence means another rebuild is running.
    pub fn lock_path(&self) -> PathBuf {
        self.index_dir.join(format!("{INDEX_FILE_NAME}.tmp"))
    }

    /// The main repository followed by the overlays.
    pub fn repository_paths(&self) -> Vec<PathBuf> {
        std::iter::once(self.portdir.clone())
            .chain(self.overlays.iter().cloned())
            .collect()
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }

    /// Whether progress messages may update the terminal title.
    pub fn show_titles(&self) -> bool {
        !self.nocolor && !self.has_feature("notitles")
    }
}

fn prefix_path(eprefix: &Path, path: &str) -> PathBuf {
    if eprefix.as_os_str().is_empty() {
        PathBuf::from(path)
    } else {
        eprefix.join(path.trim_start_matches('/'))
    }
}

/// Repository locations declared in `repos.conf`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReposConf {
    main_repo: Option<String>,
    repos: BTreeMap<String, RepoEntry>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct RepoEntry {
    location: Option<PathBuf>,
    priority: i64,
}

impl ReposConf {
    /// Load `repos.conf`, a single INI file or a directory of them.
    pub fn load(path: &Path) -> Result<ReposConf> {
        let mut conf = ReposConf::default();
        conf.load_into(path)?;
        Ok(conf)
    }

    fn load_into(&mut self, path: &Path) -> Result<()> {
        if path.is_dir() {
            let mut names = Vec::new();
            for entry in std::fs::read_dir(path).map_err(|e| Error::io(path, e))? {
                names.push(entry.map_err(|e| Error::io(path, e))?.file_name());
            }
            names.sort();
            for name in names {
                self.load_into(&path.join(name))?;
            }
            return Ok(());
        }
        match std::fs::read_to_string(path) {
            Ok(input) => self.parse(&input).map_err(|msg| {
                Error::InvalidConfig(format!("{}: {msg}", path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(path, e)),
        }
    }

    /// Merge the sections of one INI document.
    pub fn parse(&mut self, input: &str) -> std::result::Result<(), String> {
        let mut section: Option<String> = None;
        for (lineno, line) in input.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                section = Some(name.trim().to_string());
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(format!("line {}: expected key = value", lineno + 1));
            };
            let (key, value) = (key.trim(), value.trim());
            let Some(section) = section.as_deref() else {
                return Err(format!("line {}: {key} outside of a section", lineno + 1));
            };
            match (section, key) {
                ("DEFAULT", "main-repo") => self.main_repo = Some(value.to_string()),
                ("DEFAULT", _) => {}
                (repo, "location") => {
                    self.repos.entry(repo.to_string()).or_default().location =
                        Some(PathBuf::from(value));
                }
                (repo, "priority") => {
                    let priority = value
                        .parse()
                        .map_err(|_| format!("line {}: bad priority {value:?}", lineno + 1))?;
                    self.repos.entry(repo.to_string()).or_default().priority = priority;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Location of the repository named `name`.
    pub fn location(&self, name: &str) -> Option<PathBuf> {
        self.repos.get(name)?.location.clone()
    }

    /// Location of the main repository (`main-repo`, default `gentoo`).
    pub fn main_location(&self) -> Option<PathBuf> {
        self.location(self.main_repo.as_deref().unwrap_or("gentoo"))
    }

    /// Every other repository, lowest priority first.
    pub fn overlay_locations(&self, main: &Path) -> Vec<PathBuf> {
        let mut overlays: Vec<(i64, &str, &PathBuf)> = self
            .repos
            .iter()
            .filter_map(|(name, entry)| Some((entry.priority, name.as_str(), entry.location.as_ref()?)))
            .filter(|(_, _, location)| location.as_path() != main)
            .collect();
        overlays.sort();
        overlays.into_iter().map(|(_, _, l)| l.clone()).collect()
    }
}

/// Directories of the profile at `dir` and all its parents, parents first.
///
/// A parent written as `repo:path` is resolved inside that repository's
/// `profiles` directory. A profile that is its own ancestor is an error.
fn profile_chain(dir: &Path, repos: &ReposConf) -> Result<Vec<PathBuf>> {
    let mut ancestors = Vec::new();
    profile_chain_from(dir, repos, &mut ancestors)
}

fn profile_chain_from(
    dir: &Path,
    repos: &ReposConf,
    ancestors: &mut Vec<PathBuf>,
) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        tracing::debug!("no profile at {}", dir.display());
        return Ok(Vec::new());
    }
    let dir = std::fs::canonicalize(dir).map_err(|e| Error::io(dir, e))?;
    if ancestors.contains(&dir) {
        return Err(Error::InvalidConfig(format!(
            "profile {} is its own parent",
            dir.display()
        )));
    }
    let mut chain = Vec::new();
    let parent_file = dir.join("parent");
    let parents = match std::fs::read_to_string(&parent_file) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(Error::io(parent_file, e)),
    };
    for parent in parents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
    {
        let parent_dir = match parent.split_once(':') {
            Some((repo, rel)) => repos
                .location(repo)
                .ok_or_else(|| {
                    Error::InvalidConfig(format!("unknown repository {repo:?} in profile parent"))
                })?
                .join("profiles")
                .join(rel),
            None => dir.join(parent),
        };
        ancestors.push(dir.clone());
        let parents = profile_chain_from(&parent_dir, repos, ancestors);
        ancestors.pop();
        chain.extend(parents?);
    }
    chain.push(dir);
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write(path: &Path, contents: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    fn env_for(root: &Path) -> HashMap<String, String> {
        HashMap::from([(
            "PORTAGE_CONFIGROOT".to_string(),
            root.to_string_lossy().into_owned(),
        )])
    }

    #[test]
    fn defaults_without_configuration() {
        let root = tempfile::tempdir().unwrap();
        let settings = Settings::load_with_env(&env_for(root.path())).unwrap();
        assert_eq!(settings.portdir, PathBuf::from("/var/db/repos/gentoo"));
        assert_eq!(settings.index_path(), PathBuf::from("/var/cache/edb/esearchdb.json"));
        assert_eq!(
            settings.lock_path(),
            PathBuf::from("/var/cache/edb/esearchdb.json.tmp")
        );
        assert!(settings.accept_keywords.is_empty());
        assert!(settings.overlays.is_empty());
        assert!(!settings.accept_keywords_from_env);
    }

    #[test]
    fn eprefix_moves_defaults() {
        let root = tempfile::tempdir().unwrap();
        let mut env = env_for(root.path());
        env.insert("EPREFIX".to_string(), "/home/me/gentoo".to_string());
        let settings = Settings::load_with_env(&env).unwrap();
        assert_eq!(
            settings.index_dir,
            PathBuf::from("/home/me/gentoo/var/cache/edb")
        );
        assert_eq!(
            settings.portdir,
            PathBuf::from("/home/me/gentoo/var/db/repos/gentoo")
        );
        assert_eq!(settings.eroot(), PathBuf::from("/home/me/gentoo"));
    }

    #[test]
    fn eroot_combines_root_and_prefix() {
        let root = tempfile::tempdir().unwrap();
        let settings = Settings::load_with_env(&env_for(root.path())).unwrap();
        assert_eq!(settings.eroot(), PathBuf::from("/"));

        let mut env = env_for(root.path());
        env.insert("ROOT".to_string(), "/mnt/target".to_string());
        env.insert("EPREFIX".to_string(), "/opt/gentoo".to_string());
        let settings = Settings::load_with_env(&env).unwrap();
        assert_eq!(settings.root, PathBuf::from("/mnt/target"));
        assert_eq!(settings.eroot(), PathBuf::from("/mnt/target/opt/gentoo"));
    }

    #[test]
    fn profile_chain_and_make_conf() {
        let root = tempfile::tempdir().unwrap();
        let repo = root.path().join("repo");
        write(&repo.join("profiles/base/make.defaults"), "FEATURES=\"sandbox notitles\"\n");
        write(
            &repo.join("profiles/arch/amd64/make.defaults"),
            "ARCH=\"amd64\"\nACCEPT_KEYWORDS=\"amd64\"\n",
        );
        write(&repo.join("profiles/arch/amd64/parent"), "../../base\n");
        write(
            &repo.join("profiles/default/parent"),
            "gentoo:arch/amd64\n",
        );
        write(&repo.join("profiles/default/make.defaults"), "");

        let portage = root.path().join("etc/portage");
        write(
            &portage.join("repos.conf/gentoo.conf"),
            &format!("[DEFAULT]\nmain-repo = gentoo\n\n[gentoo]\nlocation = {}\n", repo.display()),
        );
        write(
            &portage.join("make.conf"),
            "ACCEPT_KEYWORDS=\"~amd64\"\nFEATURES=\"-notitles\"\nPORTDIR_OVERLAY=/srv/overlay\n",
        );
        std::os::unix::fs::symlink(repo.join("profiles/default"), portage.join("make.profile"))
            .unwrap();

        let settings = Settings::load_with_env(&env_for(root.path())).unwrap();
        assert_eq!(settings.portdir, repo);
        assert_eq!(settings.overlays, vec![PathBuf::from("/srv/overlay")]);
        assert_eq!(settings.accept_keywords.tokens(), ["amd64", "~amd64"]);
        assert_eq!(settings.features, vec!["sandbox"]);
        assert!(settings.show_titles());
    }

    #[test]
    fn cyclic_profile_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        let profiles = root.path().join("profiles");
        write(&profiles.join("a/parent"), "../b\n");
        write(&profiles.join("b/parent"), "../a\n");
        let portage = root.path().join("etc/portage");
        std::fs::create_dir_all(&portage).unwrap();
        std::os::unix::fs::symlink(profiles.join("a"), portage.join("make.profile")).unwrap();

        let err = Settings::load_with_env(&env_for(root.path())).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(ref msg) if msg.contains("its own parent")));
    }

    #[test]
    fn shared_parent_is_not_a_cycle() {
        let root = tempfile::tempdir().unwrap();
        let profiles = root.path().join("profiles");
        write(&profiles.join("base/make.defaults"), "FEATURES=\"sandbox\"\n");
        write(&profiles.join("desktop/parent"), "../base\n");
        write(&profiles.join("systemd/parent"), "../base\n");
        write(&profiles.join("leaf/parent"), "../desktop\n../systemd\n");
        let portage = root.path().join("etc/portage");
        std::fs::create_dir_all(&portage).unwrap();
        std::os::unix::fs::symlink(profiles.join("leaf"), portage.join("make.profile")).unwrap();

        let settings = Settings::load_with_env(&env_for(root.path())).unwrap();
        assert_eq!(settings.features, vec!["sandbox"]);
    }

    #[test]
    fn accept_keywords_falls_back_to_arch() {
        let root = tempfile::tempdir().unwrap();
        write(&root.path().join("etc/portage/make.conf"), "ARCH=arm64\n");
        let settings = Settings::load_with_env(&env_for(root.path())).unwrap();
        assert_eq!(settings.accept_keywords.tokens(), ["arm64"]);
    }

    #[test]
    fn environment_wins() {
        let root = tempfile::tempdir().unwrap();
        write(
            &root.path().join("etc/portage/make.conf"),
            "ACCEPT_KEYWORDS=amd64\nPORTDIR=/usr/portage\nNOCOLOR=true\n",
        );
        let mut env = env_for(root.path());
        env.insert("ACCEPT_KEYWORDS".to_string(), "~amd64".to_string());
        env.insert("PORTDIR_OVERLAY".to_string(), "/var/lib/layman/foo /usr/portage".to_string());
        let settings = Settings::load_with_env(&env).unwrap();
        assert_eq!(settings.accept_keywords.tokens(), ["amd64", "~amd64"]);
        assert!(settings.accept_keywords_from_env);
        assert_eq!(settings.portdir, PathBuf::from("/usr/portage"));
        assert_eq!(settings.overlays, vec![PathBuf::from("/var/lib/layman/foo")]);
        assert!(settings.nocolor);
        assert!(!settings.show_titles());
    }

    #[test]
    fn repos_conf_overlays_by_priority() {
        let mut conf = ReposConf::default();
        conf.parse(
            "[gentoo]\nlocation = /var/db/repos/gentoo\n\
             [guru]\nlocation = /var/db/repos/guru\npriority = 50\n\
             [local]\nlocation = /var/db/repos/local\npriority = 10\n\
             [broken]\npriority = 99\n",
        )
        .unwrap();
        assert_eq!(
            conf.main_location(),
            Some(PathBuf::from("/var/db/repos/gentoo"))
        );
        assert_eq!(
            conf.overlay_locations(Path::new("/var/db/repos/gentoo")),
            vec![
                PathBuf::from("/var/db/repos/local"),
                PathBuf::from("/var/db/repos/guru"),
            ]
        );
    }

    #[test]
    fn repos_conf_errors() {
        let mut conf = ReposConf::default();
        assert!(conf.parse("location = /nowhere\n").is_err());
        assert!(conf.parse("[x]\npriority = high\n").is_err());
        assert!(conf.parse("[x]\njunk\n").is_err());
    }
}
