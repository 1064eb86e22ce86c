pub mod cancel;
pub mod config;
pub mod database;
pub mod dispatch;
pub mod errors;
pub mod executor;
pub mod invocation;
pub mod materialize;
pub mod process;
pub mod report;
pub mod types;

#[cfg(test)]
mod testing;

#[cfg(test)]
mod database_invocation_tests {
    // Units loaded from a real database file must produce invocations that
    // keep the unit's own flags but none of the build system's outputs.

    use std::path::Path;

    use crate::database::parse_database;
    use crate::invocation::build_invocation;
    use crate::testing::test_config;

    fn args(inv: &crate::invocation::Invocation) -> Vec<String> {
        inv.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn loaded_units_build_clean_invocations() {
        let tmp = assert_fs::TempDir::new().unwrap();
        let src = tmp.path().join("src");
        std::fs::create_dir_all(src.join("mm")).unwrap();
        std::fs::write(src.join("mm/slab.c"), "int x;").unwrap();
        std::fs::write(src.join("main.c"), "int main(void) { return 0; }").unwrap();

        let db = format!(
            r#"[
                {{"directory": "{dir}", "file": "mm/slab.c",
                  "command": "gcc -Iinclude -Werror -MD -MF mm/.slab.o.d -c mm/slab.c -o mm/slab.o"}},
                {{"directory": "{dir}", "file": "main.c",
                  "arguments": ["clang", "-DX=1", "-Wp,-MMD,main.d", "-c", "main.c", "-omain.o"]}}
            ]"#,
            dir = src.display()
        );
        let db_path = src.join("compile_commands.json");
        let units = parse_database(&db, &db_path).unwrap();
        assert_eq!(units.len(), 2);

        let config = test_config(tmp.path(), 2, None);
        let staged = Path::new("/out/.frontbench-x.mlir");

        let slab_source = src.join("mm/slab.c").display().to_string();
        let slab = args(&build_invocation(&units[0], &config, staged));
        assert_eq!(
            slab,
            vec![
                "-Iinclude", "-c", "-w", "-Wno-error", "-Wno-everything",
                "-vast-emit-mlir=hl", slab_source.as_str(), "-o", "/out/.frontbench-x.mlir",
            ]
        );

        let main_source = src.join("main.c").display().to_string();
        let main = args(&build_invocation(&units[1], &config, staged));
        assert_eq!(
            main,
            vec![
                "-DX=1", "-c", "-w", "-Wno-error", "-Wno-everything",
                "-vast-emit-mlir=hl", main_source.as_str(), "-o", "/out/.frontbench-x.mlir",
            ]
        );
    }
}
