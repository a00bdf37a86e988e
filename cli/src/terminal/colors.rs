use colored::Color;

pub const PRIMARY: Color = Color::TrueColor { r: 102, g: 178, b: 255 };
pub const SECONDARY: Color = Color::TrueColor { r: 153, g: 153, b: 255 };
pub const ACCENT: Color = Color::TrueColor { r: 255, g: 204, b: 102 };
pub const SEPARATOR: Color = Color::BrightBlack;
pub const TEXT_DEFAULT: Color = Color::White;

pub const IPV4_ADDR: Color = Color::TrueColor { r: 102, g: 255, b: 178 };
pub const HOST_NAME: Color = Color::TrueColor { r: 255, g: 153, b: 204 };
