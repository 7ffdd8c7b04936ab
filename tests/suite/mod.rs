mod build_pipeline;
mod cli;
mod lsp_session;
