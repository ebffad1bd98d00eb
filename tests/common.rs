use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

// Not every test binary uses every helper.
#[allow(dead_code)]
pub struct TestContext {
    pub _temp_dir: TempDir,
    pub config_path: PathBuf,
    pub storage_dir: PathBuf,
    pub app_dir: PathBuf,
    pub bin_path: PathBuf,
}

#[allow(dead_code)]
impl TestContext {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("config.json");
        let storage_dir = temp_dir.path().join("storage").join("app");
        let app_dir = temp_dir.path().join("app");

        let bin_path = PathBuf::from(env!("CARGO_BIN_EXE_modctl"));

        Self {
            _temp_dir: temp_dir,
            config_path,
            storage_dir,
            app_dir,
            bin_path,
        }
    }

    pub fn cmd(&self) -> Command {
        let mut cmd = Command::new(&self.bin_path);
        cmd.env("MODCTL_CONFIG", &self.config_path);
        cmd.env("MODCTL_STORAGE_DIR", &self.storage_dir);
        cmd.env("MODCTL_APP_DIR", &self.app_dir);
        // Task commands succeed without a host application
        cmd.env("MODCTL_TASK_RUNNER", "true");
        cmd.env_remove("MODCTL_API_TOKEN");
        cmd.env_remove("MODCTL_MARKETPLACE_URL");
        cmd.env_remove("MODCTL_DEV_MODE");
        cmd.env_remove("APP_ENV");
        cmd.env_remove("RUST_LOG");
        cmd.env("HOME", self._temp_dir.path());
        cmd.env("XDG_DATA_HOME", self._temp_dir.path().join("data"));
        cmd.env("XDG_CONFIG_HOME", self._temp_dir.path().join("config"));
        cmd
    }

    pub fn run(&self, args: &[&str]) -> CommandOutput {
        self.cmd()
            .args(args)
            .output()
            .expect("Failed to run modctl")
            .into()
    }

    pub fn read_config(&self) -> serde_json::Value {
        let content = fs::read_to_string(&self.config_path).expect("Config file missing");
        serde_json::from_str(&content).expect("Config was not valid JSON")
    }

    pub fn module_dir(&self, name: &str) -> PathBuf {
        self.app_dir.join("Modules").join(name)
    }
}

/// Builds a zip archive in memory from `(path, contents)` pairs.
#[allow(dead_code)]
pub fn zip_bytes(files: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::FileOptions::default();
    for (name, contents) in files {
        writer.start_file(*name, options).expect("start zip entry");
        writer.write_all(contents.as_bytes()).expect("write zip entry");
    }
    writer.finish().expect("finish zip").into_inner()
}

#[allow(dead_code)]
pub fn write_zip(path: &Path, files: &[(&str, &str)]) {
    fs::write(path, zip_bytes(files)).expect("write zip file");
}

#[allow(dead_code)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: std::process::ExitStatus,
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            status: output.status,
        }
    }
}

#[allow(dead_code)]
impl CommandOutput {
    pub fn assert_success(&self) -> &Self {
        if !self.status.success() {
            panic!(
                "Command failed with status {:?}\nstdout: {}\nstderr: {}",
                self.status.code(),
                self.stdout,
                self.stderr
            );
        }
        self
    }

    pub fn assert_failure(&self) -> &Self {
        assert!(
            !self.status.success(),
            "Command unexpectedly succeeded\nstdout: {}\nstderr: {}",
            self.stdout,
            self.stderr
        );
        self
    }

    pub fn assert_stdout_contains(&self, text: &str) -> &Self {
        assert!(
            self.stdout.contains(text),
            "Stdout did not contain '{}'\nActual stdout: {}",
            text,
            self.stdout
        );
        self
    }

    pub fn assert_stderr_contains(&self, text: &str) -> &Self {
        assert!(
            self.stderr.contains(text),
            "Stderr did not contain '{}'\nActual stderr: {}",
            text,
            self.stderr
        );
        self
    }
}
