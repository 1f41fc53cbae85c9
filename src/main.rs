use jsonui::MapRegistry;
use log::error;

#[tokio::main]
async fn main() {
    let cli_args = jsonui::parse_args();

    // ログレベルを初期化
    jsonui::init_logger(&cli_args.log_level);

    let Some(path) = cli_args.schema_path.clone() else {
        eprintln!("No schema file given");
        jsonui::show_help();
        std::process::exit(2);
    };

    let registry = MapRegistry::with_builtin();
    let schema = match jsonui::load_schema(&path, cli_args.enable_lint, cli_args.quiet, &registry) {
        Ok(schema) => schema,
        Err(e) => {
            error!("Failed to load {}: {}", path.display(), e);
            std::process::exit(1);
        }
    };

    jsonui::run_page(schema, &cli_args).await;

    if cli_args.watch {
        if let Err(e) = jsonui::run_with_hotreload(path, &cli_args).await {
            error!("Hot reload failed: {}", e);
            std::process::exit(1);
        }
    }
}
