use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::config::HarnessConfig;
use crate::types::CompilationUnit;

/// Flags appended to every invocation so warnings never turn into failures.
pub const WARNING_SUPPRESSION: &[&str] = &["-w", "-Wno-error", "-Wno-everything"];

/// Flags whose following token is their value and that write files we don't control.
const FLAGS_WITH_VALUE: &[&str] = &["-o", "-MF", "-MT", "-MQ"];

/// A fully resolved frontend command for one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub working_directory: PathBuf,
}

impl Invocation {
    /// Render as a single line for logs. Not meant to be re-parsed.
    pub fn display_line(&self) -> String {
        let mut line = format!("cd {} && {}", self.working_directory.display(), self.program.display());
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }
}

/// Build the frontend invocation for `unit`, writing its artifact to `artifact`.
///
/// Layout: `frontend [-cc1] <unit flags> <warning suppression> <extra options>
/// <source> -o <artifact>`. The original compiler name, output and dependency
/// file flags, `-Werror`, and the source token itself are dropped from the
/// unit's flags.
pub fn build_invocation(unit: &CompilationUnit, config: &HarnessConfig, artifact: &Path) -> Invocation {
    let original = unit.command.get(1..).unwrap_or_default();
    let mut has_cc1 = false;
    let mut kept: Vec<OsString> = Vec::with_capacity(original.len());

    let mut tokens = original.iter();
    while let Some(token) = tokens.next() {
        let token = token.as_str();
        if token == "-cc1" {
            has_cc1 = true;
            continue;
        }
        if FLAGS_WITH_VALUE.contains(&token) {
            tokens.next();
            continue;
        }
        if is_conflicting_flag(token) || is_source_token(token, unit) {
            continue;
        }
        kept.push(OsString::from(token));
    }

    let mut args = Vec::with_capacity(kept.len() + config.extra_options.len() + 8);
    if has_cc1 {
        args.push(OsString::from("-cc1"));
    }
    args.extend(kept);
    args.extend(WARNING_SUPPRESSION.iter().map(OsString::from));
    args.extend(config.extra_options.iter().map(OsString::from));
    args.push(unit.source_path.clone().into_os_string());
    args.push(OsString::from("-o"));
    args.push(artifact.as_os_str().to_os_string());

    Invocation {
        program: config.frontend_path.clone(),
        args,
        working_directory: unit.working_directory.clone(),
    }
}

fn is_conflicting_flag(token: &str) -> bool {
    if token == "-MD" || token == "-MMD" || token == "-Werror" {
        return true;
    }
    if token.starts_with("-Werror=") || token.starts_with("-Wp,-MD,") || token.starts_with("-Wp,-MMD,") {
        return true;
    }
    // Joined forms: -ofoo.o, -MFfoo.d, ...
    (token.len() > 2 && token.starts_with("-o"))
        || FLAGS_WITH_VALUE[1..]
            .iter()
            .any(|flag| token.len() > flag.len() && token.starts_with(flag))
}

fn is_source_token(token: &str, unit: &CompilationUnit) -> bool {
    if token.starts_with('-') {
        return false;
    }
    let path = Path::new(token);
    let resolved = if path.is_absolute() {
        crate::database::normalize_path(path)
    } else {
        crate::database::normalize_path(&unit.working_directory.join(path))
    };
    resolved == unit.source_path
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroUsize;

    fn config(extra: &[&str]) -> HarnessConfig {
        HarnessConfig {
            frontend_path: PathBuf::from("/opt/vast/bin/vast-front"),
            extra_options: extra.iter().map(|s| s.to_string()).collect(),
            output_root: PathBuf::from("/tmp/out"),
            worker_count: NonZeroUsize::new(1).unwrap(),
            per_unit_timeout: None,
            artifact_suffix: "mlir".to_string(),
            log_suffix: "log".to_string(),
        }
    }

    fn unit(command: &[&str]) -> CompilationUnit {
        CompilationUnit {
            name: "kernel/fork.c".to_string(),
            source_path: PathBuf::from("/linux/kernel/fork.c"),
            working_directory: PathBuf::from("/linux"),
            command: command.iter().map(|s| s.to_string()).collect(),
            output_stem: PathBuf::from("kernel/fork"),
        }
    }

    fn args_of(inv: &Invocation) -> Vec<String> {
        inv.args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn typical_kernel_command() {
        let u = unit(&[
            "gcc",
            "-Wp,-MMD,kernel/.fork.o.d",
            "-nostdinc",
            "-Iinclude",
            "-Werror",
            "-O2",
            "-c",
            "-o",
            "kernel/fork.o",
            "kernel/fork.c",
        ]);
        let inv = build_invocation(&u, &config(&["-vast-emit-mlir=hl"]), Path::new("/tmp/out/.stage"));

        assert_eq!(inv.program, PathBuf::from("/opt/vast/bin/vast-front"));
        assert_eq!(inv.working_directory, PathBuf::from("/linux"));
        assert_eq!(
            args_of(&inv),
            vec![
                "-nostdinc",
                "-Iinclude",
                "-O2",
                "-c",
                "-w",
                "-Wno-error",
                "-Wno-everything",
                "-vast-emit-mlir=hl",
                "/linux/kernel/fork.c",
                "-o",
                "/tmp/out/.stage",
            ]
        );
    }

    #[test]
    fn cc1_moves_to_front() {
        let u = unit(&["clang", "-triple", "x86_64", "-cc1", "kernel/fork.c"]);
        let inv = build_invocation(&u, &config(&[]), Path::new("/a.mlir"));
        let args = args_of(&inv);
        assert_eq!(args[0], "-cc1");
        assert_eq!(args[1], "-triple");
        assert_eq!(args.iter().filter(|a| *a == "-cc1").count(), 1);
    }

    #[test]
    fn extra_options_keep_order_after_unit_flags() {
        let u = unit(&["cc", "-DX", "kernel/fork.c"]);
        let inv = build_invocation(&u, &config(&["-b", "-a", "-b"]), Path::new("/a.mlir"));
        let args = args_of(&inv);
        let dx = args.iter().position(|a| a == "-DX").unwrap();
        let first = args.iter().position(|a| a == "-b").unwrap();
        assert!(dx < first);
        assert_eq!(&args[first..first + 3], &["-b", "-a", "-b"]);
    }

    #[test]
    fn joined_and_dependency_flags_dropped() {
        let u = unit(&[
            "cc",
            "-okernel/fork.o",
            "-MD",
            "-MF",
            "fork.d",
            "-MTfork.o",
            "-Werror=implicit",
            "-Wall",
            "/linux/kernel/fork.c",
        ]);
        let inv = build_invocation(&u, &config(&[]), Path::new("/a.mlir"));
        let args = args_of(&inv);
        assert_eq!(args[0], "-Wall");
        assert_eq!(args.iter().filter(|a| a.as_str() == "-o").count(), 1);
        assert!(!args.iter().any(|a| a.contains("fork.o") || a.contains("fork.d")));
        assert!(!args.iter().any(|a| a.starts_with("-Werror")));
        assert_eq!(
            args.iter().filter(|a| a.as_str() == "/linux/kernel/fork.c").count(),
            1
        );
    }

    #[test]
    fn other_input_files_are_kept() {
        let u = unit(&["cc", "-include", "include/config.h", "kernel/fork.c"]);
        let inv = build_invocation(&u, &config(&[]), Path::new("/a.mlir"));
        assert!(args_of(&inv).contains(&"include/config.h".to_string()));
    }

    #[test]
    fn display_line_includes_directory() {
        let u = unit(&["cc", "kernel/fork.c"]);
        let inv = build_invocation(&u, &config(&[]), Path::new("/a.mlir"));
        let line = inv.display_line();
        assert!(line.starts_with("cd /linux && /opt/vast/bin/vast-front"));
        assert!(line.ends_with("-o /a.mlir"));
    }
}
