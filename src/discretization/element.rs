//! Tensor-product Q1 element on an axis-aligned cube of edge `h`.

/// Quadrature rule on the reference cell `[0, 1]^dim`.
#[derive(Clone, Debug)]
pub struct QuadratureRule {
    /// Name for diagnostics.
    pub name: String,
    /// Quadrature points in reference coordinates.
    pub points: Vec<Vec<f64>>,
    /// Quadrature weights.
    pub weights: Vec<f64>,
}

impl QuadratureRule {
    /// Two-point Gauss-Legendre rule in every direction.
    pub fn gauss2(dim: usize) -> Self {
        let offset = 0.5 / 3f64.sqrt();
        let line = [(0.5 - offset, 0.5), (0.5 + offset, 0.5)];
        let mut points = vec![Vec::new()];
        let mut weights = vec![1.0];
        for _ in 0..dim {
            let mut next_points = Vec::with_capacity(points.len() * 2);
            let mut next_weights = Vec::with_capacity(points.len() * 2);
            for (p, w) in points.iter().zip(&weights) {
                for &(x, wx) in &line {
                    let mut q = p.clone();
                    q.push(x);
                    next_points.push(q);
                    next_weights.push(w * wx);
                }
            }
            points = next_points;
            weights = next_weights;
        }
        Self {
            name: format!("gauss2^{dim}"),
            points,
            weights,
        }
    }
}

/// Value of local basis function `v` at reference point `x`.
fn shape_value(v: usize, x: &[f64]) -> f64 {
    x.iter()
        .enumerate()
        .map(|(d, &xd)| if (v >> d) & 1 == 1 { xd } else { 1.0 - xd })
        .product()
}

/// Reference gradient of local basis function `v` at `x`.
fn shape_gradient(v: usize, x: &[f64]) -> Vec<f64> {
    (0..x.len())
        .map(|d| {
            let sign = if (v >> d) & 1 == 1 { 1.0 } else { -1.0 };
            let others: f64 = x
                .iter()
                .enumerate()
                .filter(|&(e, _)| e != d)
                .map(|(e, &xe)| if (v >> e) & 1 == 1 { xe } else { 1.0 - xe })
                .product();
            sign * others
        })
        .collect()
}

/// Local Laplace stiffness matrix, row-major `2^dim × 2^dim`.
pub fn local_stiffness_matrix(dim: usize, h: f64) -> Vec<f64> {
    let quad = QuadratureRule::gauss2(dim);
    let n = 1usize << dim;
    let jac_det = h.powi(dim as i32);
    let mut matrix = vec![0.0; n * n];
    for (x, w) in quad.points.iter().zip(&quad.weights) {
        // physical gradient = reference gradient / h
        let grads: Vec<Vec<f64>> = (0..n)
            .map(|v| shape_gradient(v, x).into_iter().map(|g| g / h).collect())
            .collect();
        let weight = w * jac_det;
        for i in 0..n {
            for j in 0..n {
                let dot: f64 = grads[i].iter().zip(&grads[j]).map(|(a, b)| a * b).sum();
                matrix[i * n + j] += weight * dot;
            }
        }
    }
    matrix
}

/// Local mass matrix, row-major `2^dim × 2^dim`.
pub fn local_mass_matrix(dim: usize, h: f64) -> Vec<f64> {
    let quad = QuadratureRule::gauss2(dim);
    let n = 1usize << dim;
    let jac_det = h.powi(dim as i32);
    let mut matrix = vec![0.0; n * n];
    for (x, w) in quad.points.iter().zip(&quad.weights) {
        let values: Vec<f64> = (0..n).map(|v| shape_value(v, x)).collect();
        for i in 0..n {
            for j in 0..n {
                matrix[i * n + j] += w * jac_det * values[i] * values[j];
            }
        }
    }
    matrix
}
