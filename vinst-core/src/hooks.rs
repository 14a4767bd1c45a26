// vinst-core/src/hooks.rs
//! Extension point for work that runs after a release is live (launchers,
//! virtualenvs, desktop entries and the like).
use std::path::Path;

use futures::future::BoxFuture;
use tracing::{debug, error};
use vinst_common::error::{Result, VinstError};
use vinst_common::manifest::ReleaseSpec;

#[derive(Debug, Clone, Copy)]
pub struct PostInstallContext<'a> {
    pub spec: &'a ReleaseSpec,
    /// The freshly installed `app-version` directory.
    pub install_dir: &'a Path,
    pub current_pointer: &'a Path,
}

pub trait PostInstallHook: Send + Sync {
    fn name(&self) -> &str;
    fn run<'a>(&'a self, ctx: &'a PostInstallContext<'a>) -> BoxFuture<'a, Result<()>>;
}

/// Runs hooks in order, stopping at the first failure.
pub async fn run_hooks(
    hooks: &[Box<dyn PostInstallHook>],
    ctx: &PostInstallContext<'_>,
) -> Result<()> {
    for hook in hooks {
        debug!("Running post-install hook '{}'", hook.name());
        if let Err(e) = hook.run(ctx).await {
            error!("Post-install hook '{}' failed: {}", hook.name(), e);
            return Err(VinstError::PostInstallFailed(
                hook.name().to_string(),
                e.to_string(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use futures::FutureExt;

    use super::*;

    struct Recorder {
        name: &'static str,
        fail: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl PostInstallHook for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn run<'a>(&'a self, ctx: &'a PostInstallContext<'a>) -> BoxFuture<'a, Result<()>> {
            async move {
                self.log
                    .lock()
                    .unwrap()
                    .push(format!("{}:{}", self.name, ctx.install_dir.display()));
                if self.fail {
                    return Err(VinstError::Generic("boom".into()));
                }
                Ok(())
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn hooks_run_in_order_and_stop_on_failure() {
        let spec = ReleaseSpec::from_toml_str(
            "name = \"zyng\"\nversion = \"1\"\nsource = { location = \"a.zip\" }\n",
        )
        .unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let hooks: Vec<Box<dyn PostInstallHook>> = vec![
            Box::new(Recorder { name: "first", fail: false, log: log.clone() }),
            Box::new(Recorder { name: "second", fail: true, log: log.clone() }),
            Box::new(Recorder { name: "third", fail: false, log: log.clone() }),
        ];
        let ctx = PostInstallContext {
            spec: &spec,
            install_dir: Path::new("/r/zyng-1"),
            current_pointer: Path::new("/r/zyng-current"),
        };
        let err = run_hooks(&hooks, &ctx).await.unwrap_err();
        assert!(matches!(err, VinstError::PostInstallFailed(ref name, _) if name == "second"));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["first:/r/zyng-1".to_string(), "second:/r/zyng-1".to_string()]
        );
    }
}
