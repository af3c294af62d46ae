use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use cppgrade::{
    BuildStrategy, CancelToken, Config, FailureKind, Stages, build::fallback_notice,
    pipeline,
};
use uuid::Uuid;
use zip::{ZipWriter, write::SimpleFileOptions};

struct Fixture {
    root: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let root = std::env::temp_dir().join(format!("cppgrade-it-{}", Uuid::new_v4()));
        fs::create_dir_all(root.join("subs")).unwrap();
        Self { root }
    }

    fn subs(&self) -> PathBuf {
        self.root.join("subs")
    }

    fn out(&self) -> PathBuf {
        self.root.join("out")
    }

    fn zip(&self, name: &str, entries: &[(&str, &str)]) -> PathBuf {
        let path = self.subs().join(name);
        let mut zip = ZipWriter::new(File::create(&path).unwrap());
        for (entry, contents) in entries {
            if entry.ends_with('/') {
                zip.add_directory(*entry, SimpleFileOptions::default()).unwrap();
            } else {
                zip.start_file(*entry, SimpleFileOptions::default()).unwrap();
                zip.write_all(contents.as_bytes()).unwrap();
            }
        }
        zip.finish().unwrap();
        path
    }

    fn config(&self) -> Config {
        Config::builder()
            .submission_dir(self.subs())
            .output_dir(self.out())
            .build()
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

fn stages(list: &str) -> Stages {
    list.parse().unwrap()
}

#[tokio::test]
async fn loose_file_is_stripped_into_src() {
    let fx = Fixture::new();
    fs::write(fx.subs().join("alice_123_456_main.cpp"), "int main() {}\n").unwrap();

    let config = fx.config();
    let report = pipeline::run(&config, stages("normalize"), &CancelToken::new())
        .await
        .unwrap();

    assert!(report.failures.is_empty());
    assert!(fx.out().join("alice/src/main.cpp").is_file());
    assert!(fx.out().join("alice/include").is_dir());
    assert!(!fx.out().join("alice/src/alice_123_456_main.cpp").exists());
}

#[tokio::test]
async fn wrapped_cmake_project_is_unwrapped() {
    let fx = Fixture::new();
    fx.zip("bob_1_2_proj.zip", &[
        ("proj/", ""),
        ("proj/CMakeLists.txt", "project(hw)\n"),
        ("proj/src/a.cpp", "int main() {}\n"),
    ]);

    let config = fx.config();
    let report = pipeline::run(&config, stages("normalize"), &CancelToken::new())
        .await
        .unwrap();

    assert!(report.failures.is_empty());
    let bob = fx.out().join("bob");
    assert!(bob.join("CMakeLists.txt").is_file());
    assert!(bob.join("src/a.cpp").is_file());
    assert!(!bob.join("proj").exists());
    assert_eq!(BuildStrategy::probe(&bob).unwrap(), BuildStrategy::CMake);
}

#[tokio::test]
async fn corrupt_zip_is_recorded_once_and_creates_nothing() {
    let fx = Fixture::new();
    let carol = fx.subs().join("carol_1_2_x.zip");
    fs::write(&carol, b"PK\x03\x04 this is not a zip").unwrap();
    fs::write(fx.subs().join("dave_1_2_main.cpp"), "int main() {}\n").unwrap();

    let config = fx.config();
    let report = pipeline::run(&config, stages("normalize"), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].source, carol);
    assert_eq!(report.failures[0].kind, FailureKind::Extraction);
    assert!(!fx.out().join("carol").exists());
    assert!(!fx.subs().join("carol_1_2_x").exists());
    assert!(fx.out().join("dave/src/main.cpp").is_file());
}

#[tokio::test]
async fn keep_output_leaves_existing_workspace_alone() {
    let fx = Fixture::new();
    fs::create_dir_all(fx.out().join("erin/src")).unwrap();
    fs::write(fx.out().join("erin/src/graded.cpp"), "// graded\n").unwrap();
    fs::write(fx.subs().join("erin_1_2_new.cpp"), "").unwrap();

    let mut config = fx.config();
    config.keep_output = true;
    pipeline::run(&config, stages("normalize"), &CancelToken::new())
        .await
        .unwrap();

    assert!(fx.out().join("erin/src/graded.cpp").is_file());
    assert!(!fx.out().join("erin/src/new.cpp").exists());

    let config = fx.config();
    pipeline::run(&config, stages("normalize"), &CancelToken::new())
        .await
        .unwrap();

    assert!(!fx.out().join("erin/src/graded.cpp").exists());
    assert!(fx.out().join("erin/src/new.cpp").is_file());
}

#[tokio::test]
async fn workspaces_from_earlier_runs_are_not_built() {
    let fx = Fixture::new();
    fs::create_dir_all(fx.out().join("ghost/src")).unwrap();
    fs::write(fx.subs().join("alice_1_2_main.cpp"), "int main() {}\n").unwrap();

    let config = Config {
        compiler_command: "true".into(),
        ..fx.config()
    };
    let report = pipeline::run(&config, stages("normalize,build"), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(report.builds.keys().collect::<Vec<_>>(), ["alice"]);
    assert!(!fx.out().join("ghost").exists());
}

#[cfg(unix)]
mod unix {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    fn script(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn failing_makefile_falls_back_to_direct_command() {
        let fx = Fixture::new();
        let dan = fx.out().join("dan");
        fs::create_dir_all(dan.join("src")).unwrap();
        fs::write(dan.join("Makefile"), "all:\n\tfalse\n").unwrap();
        let make = script(&fx.root, "fake-make", "echo 'make: *** [all] Error 2'; exit 2");

        let before = std::env::current_dir().unwrap();
        let config = Config {
            make,
            compiler_command: "echo direct build; exit 5".into(),
            ..fx.config()
        };
        let report = pipeline::run(&config, stages("build"), &CancelToken::new())
            .await
            .unwrap();

        let dan = &report.builds["dan"];
        assert_eq!(dan.exit_code, 5);
        assert!(dan.fell_back);
        assert_eq!(dan.strategy, Some(BuildStrategy::Makefile));
        let make_at = dan.output.find("make: *** [all] Error 2").unwrap();
        let notice_at = dan.output.find(&fallback_notice(2)).unwrap();
        let direct_at = dan.output.find("direct build").unwrap();
        assert!(make_at < notice_at && notice_at < direct_at);
        assert_eq!(std::env::current_dir().unwrap(), before);
    }

    #[tokio::test]
    async fn full_run_builds_cmake_project_in_place() {
        let fx = Fixture::new();
        fx.zip("bob_1_2_proj.zip", &[
            ("proj/CMakeLists.txt", "project(hw)\n"),
            ("proj/src/a.cpp", "int main() {}\n"),
        ]);
        let cmake = script(&fx.root, "fake-cmake", "echo configured in $(basename \"$(/bin/pwd -P)\")");
        let make = script(&fx.root, "fake-make", "echo built");

        let config = Config {
            cmake,
            make,
            ..fx.config()
        };
        let report = pipeline::run(&config, Stages::default(), &CancelToken::new())
            .await
            .unwrap();

        let bob = &report.builds["bob"];
        assert!(bob.succeeded());
        assert!(!bob.fell_back);
        assert_eq!(bob.strategy, Some(BuildStrategy::CMake));
        assert_eq!(bob.output, "configured in bob\nbuilt\n");
    }

    #[tokio::test]
    async fn missing_tool_and_hung_step_are_failures_not_errors() {
        let fx = Fixture::new();
        fs::create_dir_all(fx.out().join("hank")).unwrap();
        fs::create_dir_all(fx.out().join("ivy")).unwrap();
        fs::write(fx.out().join("ivy/Makefile"), "all:\n").unwrap();

        let config = Config {
            make: "cppgrade-missing-make".into(),
            compiler_command: "sleep 30".into(),
            step_timeout_secs: 1,
            jobs: 2,
            ..fx.config()
        };
        let report = pipeline::run(&config, stages("build"), &CancelToken::new())
            .await
            .unwrap();

        let hank = &report.builds["hank"];
        assert_eq!(hank.exit_code, 124);
        assert!(hank.output.contains("timed out after 1s"));

        let ivy = &report.builds["ivy"];
        assert!(ivy.fell_back);
        assert!(ivy.output.contains("Cannot find `cppgrade-missing-make`"));
        assert!(ivy.output.contains(&fallback_notice(127)));
        assert_eq!(report.successes(), 0);
    }

    #[tokio::test]
    async fn relative_tool_path_is_found_from_inside_workspaces() {
        let fx = Fixture::new();
        fs::create_dir_all(fx.out().join("jo")).unwrap();
        fs::write(fx.out().join("jo/Makefile"), "all:\n").unwrap();

        let tools = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join(format!("tools-{}", Uuid::new_v4()));
        fs::create_dir_all(&tools).unwrap();
        let make = PathBuf::from(script(&tools, "mymake", "echo relative make ran"));
        let cwd = std::env::current_dir().unwrap();
        let Ok(relative) = make.strip_prefix(&cwd) else {
            let _ = fs::remove_dir_all(&tools);
            return;
        };

        let config = Config {
            make: relative.to_string_lossy().into_owned(),
            ..fx.config()
        };
        let report = pipeline::run(&config, stages("build"), &CancelToken::new())
            .await
            .unwrap();

        let jo = &report.builds["jo"];
        assert!(jo.succeeded(), "{}", jo.output);
        assert_eq!(jo.output, "relative make ran\n");

        let _ = fs::remove_dir_all(&tools);
    }

    #[tokio::test]
    async fn timed_out_step_keeps_what_it_printed() {
        let fx = Fixture::new();
        fs::create_dir_all(fx.out().join("kim")).unwrap();

        let config = Config {
            compiler_command: "echo partial-compiler-output; sleep 30".into(),
            step_timeout_secs: 1,
            ..fx.config()
        };
        let started = std::time::Instant::now();
        let report = pipeline::run(&config, stages("build"), &CancelToken::new())
            .await
            .unwrap();

        let kim = &report.builds["kim"];
        assert_eq!(kim.exit_code, 124);
        let partial_at = kim.output.find("partial-compiler-output").unwrap();
        let notice_at = kim.output.find("timed out after 1s").unwrap();
        assert!(partial_at < notice_at);
        assert!(started.elapsed() < std::time::Duration::from_secs(20));
    }
}
