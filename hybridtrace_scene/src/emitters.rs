use nalgebra_glm as glm;
use serde_json as js;

use crate::{json::to_vec3, SceneError};

/// A triangular area light with constant radiance.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Emitter {
    pub p0:        glm::Vec3,
    pub p1:        glm::Vec3,
    pub p2:        glm::Vec3,
    pub intensity: glm::Vec3,
}

pub fn luminance(rgb: &glm::Vec3) -> f32 {
    0.2126 * rgb.x + 0.7152 * rgb.y + 0.0722 * rgb.z
}

impl Emitter {
    pub fn from_json(object: &js::Value) -> Result<Self, SceneError> {
        let field = |key: &str| {
            object.get(key).ok_or_else(|| SceneError::malformed(format!("emitter is missing `{}`", key)))
        };
        Ok(Self {
            p0:        to_vec3(field("p0")?, "p0")?,
            p1:        to_vec3(field("p1")?, "p1")?,
            p2:        to_vec3(field("p2")?, "p2")?,
            intensity: to_vec3(field("intensity")?, "intensity")?,
        })
    }

    pub fn area(&self) -> f32 {
        0.5 * (self.p1 - self.p0).cross(&(self.p2 - self.p0)).norm()
    }

    pub fn normal(&self) -> glm::Vec3 {
        let n = (self.p1 - self.p0).cross(&(self.p2 - self.p0));
        if n.norm_squared() > 0.0 {
            n.normalize()
        } else {
            glm::vec3(0.0, 1.0, 0.0)
        }
    }

    /// Selection weight: emitted power up to a constant factor.
    pub fn power(&self) -> f32 {
        self.area() * luminance(&self.intensity)
    }
}

/// One bin of a Walker alias table.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AliasEntry {
    /// Keep this bin when the in-bin sample is below the threshold.
    pub threshold: f32,
    pub alias:     u32,
    /// Normalised selection probability of this index.
    pub pdf:       f32,
}

#[derive(Clone, Debug, Default)]
pub struct AliasTable {
    entries: Vec<AliasEntry>,
}

impl AliasTable {
    /// Vose's construction; zero or negative total weight degrades to a uniform table.
    pub fn new(weights: &[f32]) -> Self {
        let n = weights.len();
        if n == 0 {
            return Self::default();
        }

        let total: f64 = weights.iter().map(|&w| w.max(0.0) as f64).sum();
        let normalised: Vec<f64> = if total > 0.0 {
            weights.iter().map(|&w| w.max(0.0) as f64 / total).collect()
        } else {
            vec![1.0 / n as f64; n]
        };

        let mut scaled: Vec<f64> = normalised.iter().map(|p| p * n as f64).collect();
        let mut entries: Vec<AliasEntry> = normalised
            .iter()
            .enumerate()
            .map(|(i, &pdf)| AliasEntry { threshold: 1.0, alias: i as u32, pdf: pdf as f32 })
            .collect();

        let (mut small, mut large): (Vec<usize>, Vec<usize>) = (0..n).partition(|&i| scaled[i] < 1.0);
        while let (Some(s), Some(l)) = (small.pop(), large.pop()) {
            entries[s].threshold = scaled[s] as f32;
            entries[s].alias = l as u32;
            scaled[l] -= 1.0 - scaled[s];
            if scaled[l] < 1.0 {
                small.push(l);
            } else {
                large.push(l);
            }
        }
        // Leftovers are within rounding of exactly full.
        for i in small.into_iter().chain(large) {
            entries[i].threshold = 1.0;
            entries[i].alias = i as u32;
        }

        Self { entries }
    }

    pub fn entries(&self) -> &[AliasEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Picks an index from two uniform numbers in `[0, 1)` and returns it with its pdf.
    pub fn sample(&self, u_bin: f32, u_keep: f32) -> Option<(usize, f32)> {
        if self.entries.is_empty() {
            return None;
        }
        let bin = ((u_bin * self.entries.len() as f32) as usize).min(self.entries.len() - 1);
        let entry = self.entries[bin];
        let index = if u_keep < entry.threshold { bin } else { entry.alias as usize };
        Some((index, self.entries[index].pdf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Probability mass the table actually assigns to each index.
    fn effective_pdf(table: &AliasTable) -> Vec<f64> {
        let n = table.len() as f64;
        let mut mass = vec![0.0; table.len()];
        for (i, entry) in table.entries().iter().enumerate() {
            mass[i] += entry.threshold as f64 / n;
            mass[entry.alias as usize] += (1.0 - entry.threshold as f64) / n;
        }
        mass
    }

    #[test]
    fn table_reproduces_weights() {
        let weights = [1.0, 2.0, 3.0, 4.0, 0.0, 10.0];
        let table = AliasTable::new(&weights);
        let total: f32 = weights.iter().sum();
        for (i, (mass, entry)) in effective_pdf(&table).iter().zip(table.entries()).enumerate() {
            let expected = (weights[i] / total) as f64;
            assert!((mass - expected).abs() < 1e-5, "index {}: {} vs {}", i, mass, expected);
            assert!((entry.pdf as f64 - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn zero_weights_fall_back_to_uniform() {
        let table = AliasTable::new(&[0.0, 0.0, 0.0, 0.0]);
        for mass in effective_pdf(&table) {
            assert!((mass - 0.25).abs() < 1e-6);
        }
    }

    #[test]
    fn sampling_never_picks_zero_weight_entries() {
        let table = AliasTable::new(&[0.0, 5.0, 0.0, 5.0]);
        for a in 0..32 {
            for b in 0..32 {
                let (index, pdf) = table.sample(a as f32 / 32.0, b as f32 / 32.0).unwrap();
                assert!(index == 1 || index == 3);
                assert_eq!(pdf, 0.5);
            }
        }
        assert!(AliasTable::new(&[]).sample(0.5, 0.5).is_none());
    }

    #[test]
    fn emitter_power_uses_area_and_luminance() {
        let emitter = Emitter {
            p0:        glm::vec3(213.0, 548.0, 227.0),
            p1:        glm::vec3(343.0, 548.0, 227.0),
            p2:        glm::vec3(343.0, 548.0, 332.0),
            intensity: glm::vec3(17.0, 12.0, 4.0),
        };
        assert!((emitter.area() - 0.5 * 130.0 * 105.0).abs() < 1e-2);
        assert!((emitter.normal().y.abs() - 1.0).abs() < 1e-6);
        assert!((emitter.power() - emitter.area() * luminance(&emitter.intensity)).abs() < 1e-2);
    }
}
