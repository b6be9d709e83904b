use anyhow::Result;

use notegraph_mcp::web::{self, AppState};

use super::Context;

pub fn run(ctx: &Context, bind: Option<String>) -> Result<()> {
    let bind = bind.unwrap_or_else(|| ctx.settings.server.bind.clone());
    let state = AppState::new(ctx.paths.clone(), ctx.settings.clone());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(web::serve(state, &bind))
}
