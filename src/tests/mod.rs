//! Cross-module scenarios exercising the execution plane end to end:
//! scheduler pipeline against a mock runtime and internal API, and
//! queue semantics across store-sharing instances.
