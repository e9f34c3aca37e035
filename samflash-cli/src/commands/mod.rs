pub(crate) mod completions;
pub(crate) mod flash;
pub(crate) mod info;
pub(crate) mod read;
pub(crate) mod reset;
