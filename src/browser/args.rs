//! Browser command line construction

use std::path::PathBuf;

pub const USER_DATA_DIR_FLAG: &str = "--user-data-dir";
pub const DEBUGGING_PORT_FLAG: &str = "--remote-debugging-port";

const FIXED_FLAGS: [&str; 2] = ["--no-first-run", "--no-default-browser-check"];

/// Builds the browser argument list.
///
/// The managed flags come first; free-form user arguments are appended after
/// dropping their own copies of the flags we manage, so our values win.
#[derive(Debug, Clone, Default)]
pub struct BrowserArgsBuilder {
    port: u16,
    user_data_dir: Option<PathBuf>,
    extra: Vec<String>,
}

impl BrowserArgsBuilder {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    pub fn user_data_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.user_data_dir = dir;
        self
    }

    pub fn extra_args(mut self, args: &[String]) -> Self {
        self.extra = args.to_vec();
        self
    }

    pub fn build(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(FIXED_FLAGS.len() + 2 + self.extra.len());

        if let Some(dir) = &self.user_data_dir {
            args.push(format!("{USER_DATA_DIR_FLAG}={}", dir.display()));
        }
        args.extend(FIXED_FLAGS.iter().map(|f| f.to_string()));
        args.push(format!("{DEBUGGING_PORT_FLAG}={}", self.port));

        let mut managed = vec![DEBUGGING_PORT_FLAG];
        if self.user_data_dir.is_some() {
            managed.push(USER_DATA_DIR_FLAG);
        }

        let mut user_args = self.extra.iter();
        while let Some(arg) = user_args.next() {
            match managed_flag(arg, &managed) {
                // `--flag value` form: drop the value too
                Some(FlagForm::Bare) => {
                    user_args.next();
                }
                Some(FlagForm::Assigned) => {}
                None => args.push(arg.clone()),
            }
        }

        args
    }
}

enum FlagForm {
    Bare,
    Assigned,
}

fn managed_flag(arg: &str, managed: &[&str]) -> Option<FlagForm> {
    managed.iter().find_map(|flag| {
        if arg == *flag {
            Some(FlagForm::Bare)
        } else if arg
            .strip_prefix(flag)
            .is_some_and(|rest| rest.starts_with('='))
        {
            Some(FlagForm::Assigned)
        } else {
            None
        }
    })
}
