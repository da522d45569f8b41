pub mod decode;
pub mod encode;
pub mod inspect;
pub mod tokenize;
pub mod util;
