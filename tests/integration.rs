//! cargo test --test integration -- --nocapture

mod utils;

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use repokit::App;
use repokit::Config;
use repokit::RepoError;
use repokit::Repository as _;
use repokit::create_repository;
use repokit::create_repository_from_path;
use repokit::repository::BlameOptions;
use repokit::repository::CheckoutOptions;
use repokit::repository::DiffOptions;
use repokit::repository::LogOptions;
use repokit::watch::Watch;
use tracing::instrument;

#[ctor::ctor]
fn init() {
    // Disable colors for all integration tests to get clean output
    colored::control::set_override(false);
    utils::setup_logging().unwrap();
}

/// Hashes recorded while building the upstream repository.
struct Upstream {
    path: PathBuf,
    alpha: String,
    beta: String,
    gamma: String,
}

/// Normalise the scratch directory and commit hashes.
fn filters(test_dir: &Path) -> Vec<(&'static str, &'static str)> {
    vec![
        // Scratch directory
        (
            Box::leak(regex::escape(&test_dir.display().to_string()).into_boxed_str()),
            "[TMP]",
        ),
        // Commit hash
        (r"\b[0-9a-f]{40}\b", "[HASH]"),
    ]
}

/// main: Alpha -> Beta -> Gamma; feature: Gamma -> Feature.
#[instrument(skip_all)]
async fn setup_upstream(test_dir: &Path) -> anyhow::Result<Upstream> {
    let path = test_dir.join("upstream");
    utils::create_git_repo(&path).await?;

    let alpha = utils::create_commit(&path, "Alpha", "alpha.txt", "alpha\n").await?;
    utils::create_commit(&path, "Guide", "docs/guide.md", "guide\n").await?;
    let beta = utils::create_commit(&path, "Beta", "beta.txt", "beta\n").await?;
    let gamma = utils::create_commit(&path, "Gamma", "alpha.txt", "alpha\ngamma\n").await?;

    utils::git(&path, &["checkout", "--quiet", "-b", "feature"]).await?;
    utils::create_commit(&path, "Feature", "feature.txt", "feature\n").await?;
    utils::git(&path, &["checkout", "--quiet", "main"]).await?;

    Ok(Upstream {
        path,
        alpha,
        beta,
        gamma,
    })
}

/// Clone the upstream into `<test_dir>/work/clone`.
#[instrument(skip_all)]
async fn setup_clone(test_dir: &Path, upstream: &Upstream) -> anyhow::Result<PathBuf> {
    let work = test_dir.join("work");
    tokio::fs::create_dir_all(&work).await?;

    let repo = create_repository("git", upstream.path.display().to_string(), &Config::default())?;
    let options = CheckoutOptions {
        new_dir: Some("clone".to_string()),
        branch: None,
    };
    repo.checkout(".", &work, &options).await?;

    Ok(work.join("clone"))
}

#[tokio::test]
async fn test_checkout_is_idempotent() -> anyhow::Result<()> {
    let test_dir = utils::TestDir::new()?;
    let upstream = setup_upstream(test_dir.path()).await?;
    let clone = setup_clone(test_dir.path(), &upstream).await?;
    assert!(clone.join(".git").is_dir());
    assert_eq!(utils::head(&clone).await?, upstream.gamma);

    // Checking out again only pulls
    let repo = create_repository("git", upstream.path.display().to_string(), &Config::default())?;
    let options = CheckoutOptions {
        new_dir: Some("clone".to_string()),
        branch: None,
    };
    repo.checkout(".", &test_dir.path().join("work"), &options)
        .await?;
    assert_eq!(utils::head(&clone).await?, upstream.gamma);

    // New upstream commits arrive on update
    let delta = utils::create_commit(&upstream.path, "Delta", "delta.txt", "delta\n").await?;
    repo.update(&clone, None).await?;
    assert_eq!(utils::head(&clone).await?, delta);

    // Without a new_dir the last URI segment names the working copy
    repo.checkout(".", &test_dir.path().join("work"), &CheckoutOptions::default())
        .await?;
    assert!(test_dir.path().join("work/upstream/.git").is_dir());

    Ok(())
}

#[tokio::test]
async fn test_branch_switching() -> anyhow::Result<()> {
    let test_dir = utils::TestDir::new()?;
    let upstream = setup_upstream(test_dir.path()).await?;
    let clone = setup_clone(test_dir.path(), &upstream).await?;

    let repo = create_repository_from_path(&clone, &Config::default()).await?;
    let repokit::AnyRepository::Git(git) = &repo;
    assert_eq!(git.branches(&clone).await?.current_name(), Some("main"));

    // Not yet a local branch, so it is created from origin
    let options = CheckoutOptions {
        new_dir: Some("clone".to_string()),
        branch: Some("feature".to_string()),
    };
    repo.checkout(".", &test_dir.path().join("work"), &options)
        .await?;
    let listing = git.branches(&clone).await?;
    assert_eq!(listing.names, vec!["feature", "main"]);
    assert_eq!(listing.current_name(), Some("feature"));
    assert!(clone.join("feature.txt").is_file());

    repo.update(&clone, Some("main")).await?;
    assert_eq!(git.branches(&clone).await?.current_name(), Some("main"));
    assert!(!clone.join("feature.txt").exists());

    Ok(())
}

#[tokio::test]
async fn test_file_queries() -> anyhow::Result<()> {
    let test_dir = utils::TestDir::new()?;
    let upstream = setup_upstream(test_dir.path()).await?;
    let clone = setup_clone(test_dir.path(), &upstream).await?;
    let repo = create_repository("git", upstream.path.display().to_string(), &Config::default())?;
    let alpha_txt = clone.join("alpha.txt");

    assert_eq!(repo.cat(&alpha_txt, None).await?, "alpha\ngamma\n");
    assert_eq!(repo.cat(&alpha_txt, Some(upstream.alpha.as_str())).await?, "alpha\n");
    assert_eq!(repo.size(&alpha_txt, None).await?, 12);
    assert_eq!(repo.size(&alpha_txt, Some(upstream.alpha.as_str())).await?, 6);

    assert_eq!(
        repo.ls(&clone, None).await?,
        vec!["alpha.txt", "beta.txt", "docs/guide.md"]
    );
    assert_eq!(
        repo.ls(&clone.join("docs/guide.md"), None).await?,
        vec!["docs/guide.md"]
    );
    assert!(
        repo.ls(&clone, Some("origin/feature"))
            .await?
            .contains(&"feature.txt".to_string())
    );

    let log = repo.log(&alpha_txt, &LogOptions::default()).await?;
    assert!(log.contains("Gamma"), "{log}");
    assert!(log.contains("Alpha"), "{log}");
    assert!(!log.contains("Beta"), "{log}");

    let log = repo
        .log(
            &clone,
            &LogOptions {
                branch: Some("origin/feature".to_string()),
                ..Default::default()
            },
        )
        .await?;
    assert!(log.contains("Feature"), "{log}");

    let blame = repo.blame(&alpha_txt, &BlameOptions::default()).await?;
    assert!(blame.contains(&upstream.alpha), "{blame}");
    assert!(blame.contains(&upstream.gamma), "{blame}");

    let blame = repo
        .blame(
            &alpha_txt,
            &BlameOptions {
                lines: Some((2, 2)),
                ..Default::default()
            },
        )
        .await?;
    assert_eq!(blame.lines().count(), 1);
    assert!(blame.starts_with(&upstream.gamma), "{blame}");

    Ok(())
}

#[tokio::test]
async fn test_blame_removed_directory() -> anyhow::Result<()> {
    let test_dir = utils::TestDir::new()?;
    let upstream = setup_upstream(test_dir.path()).await?;
    let clone = setup_clone(test_dir.path(), &upstream).await?;
    let repo = create_repository("git", upstream.path.display().to_string(), &Config::default())?;

    // The file is gone locally but still exists at the tracking ref
    tokio::fs::remove_dir_all(clone.join("docs")).await?;
    let blame = repo
        .blame(&clone.join("docs/guide.md"), &BlameOptions::default())
        .await?;
    assert_eq!(blame.lines().count(), 1);
    assert!(blame.trim_end().ends_with("guide"), "{blame}");

    Ok(())
}

#[tokio::test]
async fn test_history_queries() -> anyhow::Result<()> {
    let test_dir = utils::TestDir::new()?;
    let upstream = setup_upstream(test_dir.path()).await?;
    let clone = setup_clone(test_dir.path(), &upstream).await?;
    let repo = create_repository("git", upstream.path.display().to_string(), &Config::default())?;

    assert_eq!(
        repo.previous_commit(&clone, &upstream.gamma, "alpha.txt", true)
            .await?,
        Some(upstream.alpha.clone())
    );
    assert_eq!(
        repo.previous_commit(&clone, &upstream.beta, "beta.txt", false)
            .await?,
        None
    );
    assert_eq!(
        repo.previous_commit(&clone, "no-such-rev", "beta.txt", true)
            .await?,
        None
    );
    assert_eq!(repo.last_revision(&clone).await?, Some(upstream.gamma.clone()));

    let show = repo.show(&clone, Some(upstream.beta.as_str())).await?;
    assert!(show.contains("+beta"), "{show}");

    tokio::fs::write(clone.join("alpha.txt"), "alpha\nlocal\n").await?;
    let diff = repo
        .diff(&clone.join("alpha.txt"), &DiffOptions::default())
        .await?;
    assert!(diff.contains("-gamma"), "{diff}");
    assert!(diff.contains("+local"), "{diff}");

    let diff = repo
        .diff(
            &clone,
            &DiffOptions {
                revs: vec![upstream.alpha.clone(), upstream.beta.clone()],
                files: None,
            },
        )
        .await?;
    assert!(diff.contains("+beta"), "{diff}");
    assert!(diff.contains("+guide"), "{diff}");
    assert!(!diff.contains("local"), "{diff}");

    Ok(())
}

#[tokio::test]
async fn test_last_revision_of_root_commit() -> anyhow::Result<()> {
    let test_dir = utils::TestDir::new()?;
    let path = test_dir.path().join("single");
    utils::create_git_repo(&path).await?;
    utils::create_commit(&path, "Only", "only.txt", "only\n").await?;

    let repo = create_repository_from_path(&path, &Config::default()).await?;
    assert_eq!(repo.last_revision(&path).await?, None);
    assert_eq!(
        repo.previous_commit(&path, "HEAD", "only.txt", true).await?,
        None
    );

    Ok(())
}

#[tokio::test]
async fn test_discovery() -> anyhow::Result<()> {
    let test_dir = utils::TestDir::new()?;
    let upstream = setup_upstream(test_dir.path()).await?;
    let clone = setup_clone(test_dir.path(), &upstream).await?;
    let upstream_uri = upstream.path.display().to_string();

    // Every path inside the clone resolves to the origin
    for path in [
        clone.clone(),
        clone.join("alpha.txt"),
        clone.join("docs"),
        clone.join("docs/guide.md"),
    ] {
        let repo = create_repository_from_path(&path, &Config::default()).await?;
        assert_eq!(repo.uri(), upstream_uri, "{}", path.display());
    }

    // Without an origin the working copy root is the URI
    let repo =
        create_repository_from_path(&upstream.path.join("docs/guide.md"), &Config::default())
            .await?;
    assert_eq!(repo.uri(), upstream_uri);
    assert_eq!(repo.cat(&upstream.path.join("beta.txt"), None).await?, "beta\n");

    let outside = test_dir.path().join("plain");
    tokio::fs::create_dir_all(&outside).await?;
    let err = create_repository_from_path(&outside, &Config::default())
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::UnrecognizedPath(_)), "{err:?}");

    // A handle only accepts paths from its own repository
    let repo = create_repository("git", upstream_uri.clone(), &Config::default())?;
    let err = repo.cat(&outside, None).await.unwrap_err();
    assert!(err.is_invalid_working_copy(), "{err:?}");

    let other = create_repository("git", "/srv/elsewhere", &Config::default())?;
    let err = other.cat(&clone.join("alpha.txt"), None).await.unwrap_err();
    assert!(
        matches!(err, RepoError::UriMismatch { ref actual, .. } if actual == &upstream_uri),
        "{err:?}"
    );

    Ok(())
}

#[tokio::test]
async fn test_watches() -> anyhow::Result<()> {
    let test_dir = utils::TestDir::new()?;
    let upstream = setup_upstream(test_dir.path()).await?;
    let clone = setup_clone(test_dir.path(), &upstream).await?;

    let mut repo =
        create_repository("git", upstream.path.display().to_string(), &Config::default())?;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let id = repo.add_watch(Watch::Ls, move |line| {
        sink.lock().unwrap().push(line.to_string())
    });

    let files = repo.ls(&clone, None).await?;
    assert_eq!(*seen.lock().unwrap(), files);

    // Copies start without watches
    repo.copy().ls(&clone, None).await?;
    assert_eq!(seen.lock().unwrap().len(), files.len());

    repo.remove_watch(Watch::Ls, id);
    repo.ls(&clone, None).await?;
    assert_eq!(seen.lock().unwrap().len(), files.len());

    Ok(())
}

#[tokio::test]
async fn test_commands() -> anyhow::Result<()> {
    let test_dir = utils::TestDir::new()?;
    let upstream = setup_upstream(test_dir.path()).await?;
    let work = test_dir.path().join("work");
    tokio::fs::create_dir_all(&work).await?;
    let filters = filters(test_dir.path());
    insta::assert_snapshot!("", @""); // Display insta code lense

    let app = App::new(Config::default());
    let upstream_uri = upstream.path.display().to_string();
    let options = CheckoutOptions {
        new_dir: Some("clone".to_string()),
        branch: Some("main".to_string()),
    };

    let out = run_and_capture!(|out| app.cmd_checkout("git", &upstream_uri, ".", &work, &options, out));
    assert_snapshot_filtered!(out, filters, @r"
    Checked out . from [TMP]/upstream
    On branch main
    ");
    let clone = work.join("clone");

    let out = run_and_capture!(|out| app.cmd_ls(&clone, None, out));
    assert_snapshot_filtered!(out, filters, @r"
    alpha.txt
    beta.txt
    docs/guide.md
    ");

    let alpha_txt = clone.join("alpha.txt");
    let out = run_and_capture!(|out| app.cmd_cat(&alpha_txt, None, out));
    assert_snapshot_filtered!(out, filters, @r"
    alpha
    gamma
    ");

    let beta_txt = clone.join("beta.txt");
    let out = run_and_capture!(|out| app.cmd_size(&beta_txt, None, out));
    assert_snapshot_filtered!(out, filters, @"5");

    let out = run_and_capture!(|out| app.cmd_last_revision(&clone, out));
    assert_snapshot_filtered!(out, filters, @"[HASH]");

    let out = run_and_capture!(|out| app.cmd_previous_commit(&clone, "HEAD", "beta.txt", true, out));
    assert_snapshot_filtered!(out, filters, @"none");

    let out = run_and_capture!(|out| app.cmd_update(&clone, Some("feature"), out));
    assert_snapshot_filtered!(out, filters, @"Updated [TMP]/work/clone");

    let out = run_and_capture!(|out| app.cmd_branches(&clone, false, out));
    assert_snapshot_filtered!(out, filters, @r"
    * feature
      main
    ");

    let out = run_and_capture!(|out| app.cmd_branches(&clone, true, out));
    assert_snapshot_filtered!(out, filters, @r#"
    {
      "current": 0,
      "names": [
        "feature",
        "main"
      ]
    }
    "#);

    let out = run_and_capture!(|out| app.cmd_config(&clone, Some("remote.origin.url"), false, out));
    assert_snapshot_filtered!(out, filters, @"[TMP]/upstream");

    let out = run_and_capture!(|out| app.cmd_info(&clone, false, out));
    assert_snapshot_filtered!(out, filters, @r"
    URI: [TMP]/upstream
    Kind: git
    Origin: [TMP]/upstream
    Branch: feature
    Last revision: [HASH]
    ");

    let out = run_and_capture!(|out| app.cmd_info(&clone, true, out));
    assert_snapshot_filtered!(out, filters, @r#"
    {
      "uri": "[TMP]/upstream",
      "kind": "git",
      "origin": "[TMP]/upstream",
      "branch": "feature",
      "last_revision": "[HASH]"
    }
    "#);

    Ok(())
}
