//! Integration tests for buildsrv

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    /// Command isolated from the user's config
    fn buildsrv(temp: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("buildsrv");
        cmd.env_remove("RUST_LOG")
            .env("BUILDSRV_CONFIG", temp.path().join("config.toml"));
        cmd
    }

    #[test]
    fn help_displays() {
        let temp = TempDir::new().unwrap();
        buildsrv(&temp)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("on-demand custom build server"));
    }

    #[test]
    fn version_displays() {
        let temp = TempDir::new().unwrap();
        buildsrv(&temp)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("buildsrv"));
    }

    #[test]
    fn features_lists_addons() {
        let temp = TempDir::new().unwrap();
        buildsrv(&temp)
            .args(["features", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("git"))
            .stdout(predicate::str::contains("ipfilter"))
            .stdout(predicate::str::contains("gzip").not());
    }

    #[test]
    fn features_all_includes_builtins() {
        let temp = TempDir::new().unwrap();
        buildsrv(&temp)
            .args(["features", "--all", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("gzip"));
    }

    #[test]
    fn features_json() {
        let temp = TempDir::new().unwrap();
        buildsrv(&temp)
            .args(["features", "-f", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("github.com/abiosoft/caddy-git"));
    }

    #[test]
    fn features_from_config() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("config.toml"),
            r#"
[[features]]
name = "alpha"
package = "example.com/alpha"

[[features]]
name = "beta"
"#,
        )
        .unwrap();

        buildsrv(&temp)
            .args(["features", "-f", "plain"])
            .assert()
            .success()
            .stdout("alpha\n");
    }

    #[test]
    fn duplicate_features_rejected() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("config.toml"),
            "[[features]]\nname = \"a\"\n\n[[features]]\nname = \"a\"\n",
        )
        .unwrap();

        buildsrv(&temp)
            .arg("features")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid feature registry"));
    }

    #[test]
    fn config_path() {
        let temp = TempDir::new().unwrap();
        buildsrv(&temp)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let temp = TempDir::new().unwrap();
        buildsrv(&temp)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[builds]"))
            .stdout(predicate::str::contains("ttl_secs = 86400"));
    }

    #[test]
    fn config_init_creates_file() {
        let temp = TempDir::new().unwrap();
        buildsrv(&temp).args(["config", "init"]).assert().success();
        assert!(temp.path().join("config.toml").exists());
    }

    #[test]
    fn invalid_config_fails_with_hint() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("config.toml"), "[builds\n").unwrap();

        buildsrv(&temp)
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"))
            .stderr(predicate::str::contains("Hint:"));
    }

    #[test]
    fn serve_rejects_bad_listen_address() {
        let temp = TempDir::new().unwrap();
        buildsrv(&temp)
            .args(["serve", "--listen", "not-an-address"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("binding not-an-address"));
    }
}

#[cfg(unix)]
mod http_tests {
    use buildsrv::builder::CommandBuilder;
    use buildsrv::config::schema::BuilderConfig;
    use buildsrv::config::Config;
    use buildsrv::server::{self, AppState};
    use buildsrv::service::BuildService;
    use buildsrv::BuildsrvResult;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;

    /// Logs each invocation to `runs.log` in the source dir, then writes a
    /// small fake binary
    const OK_SCRIPT: &str = r#"echo "$BUILDSRV_OS/$BUILDSRV_ARCH" >> runs.log; sleep 0.3; printf 'fake binary' > "$BUILDSRV_OUTPUT""#;

    struct TestServer {
        temp: TempDir,
        base: String,
        stop: Option<oneshot::Sender<()>>,
        task: JoinHandle<BuildsrvResult<()>>,
    }

    impl TestServer {
        async fn start(script: &str, ttl_secs: u64) -> Self {
            let temp = TempDir::new().unwrap();
            std::fs::create_dir_all(temp.path().join("dist")).unwrap();
            std::fs::write(temp.path().join("dist/README.txt"), "readme").unwrap();

            let mut config = Config::default();
            config.general.audit_log = false;
            config.builds.root = temp.path().join("builds");
            config.builds.ttl_secs = ttl_secs;
            config.builds.aux_files = vec![PathBuf::from("dist/README.txt")];
            config.builder = BuilderConfig {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), script.to_string()],
                source_dir: temp.path().to_path_buf(),
                work_root: Some(temp.path().join("work")),
            };

            let builder = Arc::new(CommandBuilder::new(&config.builder));
            let service = Arc::new(BuildService::from_config(&config, builder).unwrap());
            let state = AppState::new(service, &config.server).unwrap();

            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let base = format!("http://{}", listener.local_addr().unwrap());
            let (stop, stopped) = oneshot::channel::<()>();
            let task = tokio::spawn(server::serve(listener, state, async {
                let _ = stopped.await;
            }));

            Self {
                temp,
                base,
                stop: Some(stop),
                task,
            }
        }

        fn url(&self, path: &str) -> String {
            format!("{}{}", self.base, path)
        }

        fn runs(&self) -> usize {
            std::fs::read_to_string(self.temp.path().join("runs.log"))
                .map(|s| s.lines().count())
                .unwrap_or(0)
        }

        fn build_root(&self) -> PathBuf {
            self.temp.path().join("builds")
        }

        async fn stop(mut self) -> (TempDir, BuildsrvResult<()>) {
            if let Some(stop) = self.stop.take() {
                let _ = stop.send(());
            }
            let result = self.task.await.unwrap();
            (self.temp, result)
        }
    }

    struct Reply {
        status: u16,
        headers: HashMap<String, String>,
        body: Vec<u8>,
    }

    impl Reply {
        fn header(&self, name: &str) -> Option<&str> {
            self.headers.get(name).map(String::as_str)
        }

        fn text(&self) -> String {
            String::from_utf8_lossy(&self.body).into_owned()
        }
    }

    async fn fetch(method: &'static str, url: String) -> Reply {
        tokio::task::spawn_blocking(move || {
            let agent: ureq::Agent = ureq::Agent::config_builder()
                .http_status_as_error(false)
                .build()
                .into();
            let mut response = match method {
                "HEAD" => agent.head(&url).call(),
                _ => agent.get(&url).call(),
            }
            .unwrap();

            let headers = response
                .headers()
                .iter()
                .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or("").to_string()))
                .collect();
            let body = if method == "HEAD" {
                Vec::new()
            } else {
                response.body_mut().read_to_vec().unwrap()
            };

            Reply {
                status: response.status().as_u16(),
                headers,
                body,
            }
        })
        .await
        .unwrap()
    }

    async fn get(url: String) -> Reply {
        fetch("GET", url).await
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn first_request_creates_then_reuses() {
        let server = TestServer::start(OK_SCRIPT, 3600).await;
        let url = server.url("/download/build?os=linux&arch=amd64&features=git");

        let first = get(url.clone()).await;
        assert_eq!(first.status, 201, "{}", first.text());
        let location = first.header("location").unwrap().to_string();
        assert!(location.starts_with("/download/builds/"));
        assert!(location.ends_with("/caddy_linux_amd64_custom.tar.gz"));
        assert_eq!(
            first.header("content-disposition"),
            Some("attachment; filename=\"caddy_linux_amd64_custom.tar.gz\"")
        );
        assert!(first.header("expires").unwrap().ends_with(" GMT"));
        assert_eq!(first.header("x-build-key").unwrap().len(), 12);
        assert_eq!(first.header("access-control-allow-origin"), Some("*"));
        assert_eq!(first.header("access-control-expose-headers"), Some("Location"));
        assert_eq!(&first.body[..2], &[0x1f, 0x8b]);

        let second = get(url).await;
        assert_eq!(second.status, 200);
        assert_eq!(second.header("location"), Some(location.as_str()));
        assert_eq!(second.body, first.body);

        let download = get(server.url(&location)).await;
        assert_eq!(download.status, 200);
        assert_eq!(download.body, first.body);

        assert_eq!(server.runs(), 1);
        let (_temp, result) = server.stop().await;
        result.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn equivalent_requests_share_one_build() {
        let server = TestServer::start(OK_SCRIPT, 3600).await;

        let urls = [
            "/download/build?os=linux&arch=arm&arm=7&features=git,ipfilter",
            "/download/build?os=linux&arch=arm&features=ipfilter,git",
            "/download/build?os=linux&arch=arm&arm=7&features=ipfilter,,git,git",
        ];
        let tasks: Vec<_> = (0..9)
            .map(|i| tokio::spawn(get(server.url(urls[i % urls.len()]))))
            .collect();

        let mut statuses = Vec::new();
        let mut locations = Vec::new();
        for task in tasks {
            let reply = task.await.unwrap();
            statuses.push(reply.status);
            locations.push(reply.header("location").unwrap_or_default().to_string());
        }

        assert_eq!(statuses.iter().filter(|s| **s == 201).count(), 1);
        assert_eq!(statuses.iter().filter(|s| **s == 200).count(), 8);
        assert!(locations.iter().all(|l| l == &locations[0]));
        assert!(locations[0].ends_with("/caddy_linux_arm7_custom.tar.gz"));
        assert_eq!(server.runs(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn head_returns_headers_only() {
        let server = TestServer::start(OK_SCRIPT, 0).await;

        let reply = fetch("HEAD", server.url("/download/build?os=windows&arch=amd64")).await;
        assert_eq!(reply.status, 201);
        assert_eq!(
            reply.header("content-disposition"),
            Some("attachment; filename=\"caddy_windows_amd64_custom.zip\"")
        );
        assert_eq!(reply.header("content-type"), Some("application/zip"));
        assert!(reply.header("content-length").unwrap().parse::<u64>().unwrap() > 0);
        // Builds that never expire carry no Expires header
        assert!(reply.header("expires").is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn validation_errors_are_client_errors() {
        let server = TestServer::start(OK_SCRIPT, 3600).await;

        let cases = [
            ("/download/build?arch=amd64", "missing os parameter"),
            ("/download/build?os=linux", "missing arch parameter"),
            ("/download/build?os=plan9&arch=amd64", "plan9/amd64 not supported"),
            ("/download/build?os=linux&arch=arm&arm=9", "arm version not supported: 9"),
            (
                "/download/build?os=linux&arch=amd64&features=doesnotexist",
                "unknown feature 'doesnotexist'",
            ),
        ];
        for (path, message) in cases {
            let reply = get(server.url(path)).await;
            assert_eq!(reply.status, 400, "{path}");
            assert!(reply.text().contains(message), "{path}: {}", reply.text());
            assert_eq!(reply.header("access-control-allow-origin"), Some("*"));
        }

        assert_eq!(server.runs(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn build_failure_is_generic_and_retried() {
        let script = r#"echo run >> runs.log; echo "secret compiler detail" >&2; exit 1"#;
        let server = TestServer::start(script, 3600).await;
        let url = server.url("/download/build?os=linux&arch=386");

        let reply = get(url.clone()).await;
        assert_eq!(reply.status, 500);
        assert!(!reply.text().contains("secret"));
        assert!(reply.header("location").is_none());

        // Failed job is dropped so the next request builds again
        let reply = get(url).await;
        assert_eq!(reply.status, 500);
        assert_eq!(server.runs(), 2);

        let leftovers = std::fs::read_dir(server.build_root()).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn online_and_features_endpoints() {
        let server = TestServer::start(OK_SCRIPT, 3600).await;

        let online = get(server.url("/online")).await;
        assert_eq!(online.status, 200);
        assert_eq!(online.text(), "OK");

        let features = get(server.url("/features.json")).await;
        assert_eq!(features.status, 200);
        assert_eq!(features.header("content-type"), Some("application/json"));
        let list: Vec<serde_json::Value> = serde_json::from_slice(&features.body).unwrap();
        let names: Vec<_> = list.iter().filter_map(|f| f["name"].as_str()).collect();
        assert_eq!(names, vec!["git", "ipfilter"]);
        assert!(list.iter().all(|f| f["package"].as_str().is_some_and(|p| !p.is_empty())));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_download_is_not_found() {
        let server = TestServer::start(OK_SCRIPT, 3600).await;
        let reply = get(server.url("/download/builds/000000000000000/nothing.zip")).await;
        assert_eq!(reply.status, 404);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn download_serves_only_finished_archives() {
        let server = TestServer::start(OK_SCRIPT, 3600).await;
        let built = get(server.url("/download/build?os=linux&arch=amd64")).await;
        assert_eq!(built.status, 201, "{}", built.text());
        let location = built.header("location").unwrap().to_string();
        let (dir, _) = location.rsplit_once('/').unwrap();

        let raw = get(server.url(&format!("{dir}/caddy"))).await;
        assert_eq!(raw.status, 404);

        let partial = get(server.url(&format!("{dir}/.caddy_linux_amd64_custom.tar.gz.partial"))).await;
        assert_eq!(partial.status, 400);

        assert_eq!(get(server.url(&location)).await.status, 200);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn expired_build_is_rebuilt() {
        let server = TestServer::start(OK_SCRIPT, 1).await;
        let url = server.url("/download/build?os=freebsd&arch=amd64");

        let first = get(url.clone()).await;
        assert_eq!(first.status, 201);
        let location = first.header("location").unwrap().to_string();

        tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
        assert_eq!(get(server.url(&location)).await.status, 404);

        let second = get(url).await;
        assert_eq!(second.status, 201);
        assert_eq!(server.runs(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shutdown_removes_build_root() {
        let server = TestServer::start(OK_SCRIPT, 3600).await;
        let reply = get(server.url("/download/build?os=darwin&arch=amd64")).await;
        assert_eq!(reply.status, 201);

        let root = server.build_root();
        assert!(root.exists());

        let (_temp, result) = server.stop().await;
        result.unwrap();
        assert!(!root.exists());
    }
}
