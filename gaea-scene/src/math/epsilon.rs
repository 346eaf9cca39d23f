pub const EPSILON1: f64 = 1e-1;
pub const EPSILON2: f64 = 1e-2;
pub const EPSILON3: f64 = 1e-3;
pub const EPSILON4: f64 = 1e-4;
pub const EPSILON5: f64 = 1e-5;
pub const EPSILON6: f64 = 1e-6;
pub const EPSILON7: f64 = 1e-7;
pub const EPSILON8: f64 = 1e-8;
pub const EPSILON9: f64 = 1e-9;
pub const EPSILON10: f64 = 1e-10;
pub const EPSILON11: f64 = 1e-11;
pub const EPSILON12: f64 = 1e-12;
pub const EPSILON13: f64 = 1e-13;
pub const EPSILON14: f64 = 1e-14;
pub const EPSILON15: f64 = 1e-15;
pub const EPSILON16: f64 = 1e-16;
pub const EPSILON17: f64 = 1e-17;
pub const EPSILON18: f64 = 1e-18;
pub const EPSILON19: f64 = 1e-19;
pub const EPSILON20: f64 = 1e-20;
